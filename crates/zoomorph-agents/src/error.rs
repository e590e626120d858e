//! Error types for the `zoomorph-agents` crate.

use zoomorph_policy::PolicyError;
use zoomorph_types::EntityId;
use zoomorph_world::WorldError;

/// Errors raised while an organism updates or applies a tick.
#[derive(Debug, thiserror::Error)]
pub enum OrganismError {
    /// Action selection or learning dispatch failed.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// A snapshot lookup failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// The organism's configuration cannot produce a working network.
    #[error("invalid organism configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },
}

impl OrganismError {
    /// Convert into the error an [`zoomorph_world::Entity`] callback
    /// returns. Snapshot errors pass through unchanged so the engine can
    /// still tell a desync apart from an ordinary per-entity failure.
    pub fn into_world(self, id: EntityId) -> WorldError {
        match self {
            Self::World(err) => err,
            other => WorldError::Entity {
                id,
                reason: other.to_string(),
            },
        }
    }
}
