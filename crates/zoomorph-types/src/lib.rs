//! Shared type definitions for the Zoomorph simulation.
//!
//! This crate is the single source of truth for the small value types that
//! cross crate (and process) boundaries: identifiers, the discrete action
//! set, entity kinds, learning samples, and the hyperparameter snapshot an
//! organism ships with every learning request.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for entity identifiers
//! - [`enums`] -- Discrete actions and entity kinds
//! - [`learning`] -- Experiences and learning hyperparameters

pub mod enums;
pub mod ids;
pub mod learning;

// Re-export all public types at crate root for convenience.
pub use enums::{Action, EntityKind};
pub use ids::EntityId;
pub use learning::{Experience, LearnHyperparams, PendingExperience};
