//! Tick engine and orchestration for the Zoomorph simulation.
//!
//! One tick runs four phases, never interleaved across ticks:
//!
//! 1. **Snapshot** -- clone the current snapshot and advance the clock.
//! 2. **Perceive + Decide** -- every entity reads the frozen old snapshot
//!    and returns an effect record.
//! 3. **Apply** -- each entity's fields are written into the new snapshot,
//!    its effects resolved (movement, collisions, consumption, attention,
//!    deletion), resolved values pushed back, and `apply` fanned out.
//!    Removals and spawns follow.
//! 4. **Commit** -- the old snapshot goes to the bounded history and the
//!    new one becomes current.
//!
//! Learning runs beside the tick: a [`pump::LearningPump`] thread drains
//! finished training results into each organism's policy runtime and raises
//! the global stop flag if that pipeline ever fails.
//!
//! # Modules
//!
//! - [`clock`] -- Tick counter and simulated time
//! - [`config`] -- Loading `zoomorph-config.yaml` into typed structs
//! - [`control`] -- Shared stop / fatal-error state ([`control::ControlState`])
//! - [`spatial`] -- Nearest-neighbour queries, occupancy, empty-cell search
//! - [`engine`] -- The [`engine::Engine`] and its tick lifecycle
//! - [`pump`] -- Learner registry and the learning result pump
//! - [`runner`] -- Async tick driver with stop conditions

pub mod clock;
pub mod config;
pub mod control;
pub mod engine;
pub mod pump;
pub mod runner;
pub mod spatial;
