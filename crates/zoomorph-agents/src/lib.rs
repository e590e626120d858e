//! Organisms for the Zoomorph simulation.
//!
//! An [`Organism`] is the only entity whose behaviour is learned. Each tick
//! it perceives the frozen old snapshot, picks an action through its
//! [`zoomorph_policy::PolicyRuntime`], and turns that action into attention
//! and movement deltas. After the engine has resolved those deltas into the
//! new snapshot, the organism scores the outcome, completes the pending
//! experience, and (when its store can sample) queues a learning request.
//!
//! # Modules
//!
//! - [`config`] -- Tunables for organisms, rewards, and learning ([`OrganismConfig`])
//! - [`perception`] -- Perception vector, nearest-items curriculum, item memory
//! - [`reward`] -- Reward shaping with decaying weights ([`RewardShaper`])
//! - [`organism`] -- The [`Organism`] entity
//! - [`error`] -- Error types ([`OrganismError`])

pub mod config;
pub mod error;
pub mod organism;
pub mod perception;
pub mod reward;

pub use config::{OrganismConfig, ReproductionConfig, RewardConfig};
pub use error::OrganismError;
pub use organism::Organism;
pub use perception::{ItemMemory, Perception};
pub use reward::{RewardShaper, ShapingWeights};
