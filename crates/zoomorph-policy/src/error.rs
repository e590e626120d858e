//! Error types for the `zoomorph-policy` crate.

use zoomorph_types::EntityId;

/// Errors raised by policy models and the policy runtime.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A vector or weight blob did not have the size the model expects.
    #[error("{what} has length {actual}, expected {expected}")]
    ShapeMismatch {
        /// Which value was malformed.
        what: &'static str,
        /// Length the model expects.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// The model shape cannot be built.
    #[error("invalid model spec: {reason}")]
    InvalidSpec {
        /// Explanation of what is wrong with the spec.
        reason: String,
    },

    /// A training step produced a non-finite value.
    #[error("training diverged: {what} is not finite")]
    NonFinite {
        /// Which quantity went non-finite.
        what: &'static str,
    },

    /// A learning request could not be handed to the worker pool.
    #[error("failed to dispatch learning request for agent {agent_id}: {reason}")]
    Dispatch {
        /// Agent whose request was dropped.
        agent_id: EntityId,
        /// Underlying cause.
        reason: String,
    },

    /// Processing a learning result failed. The training pipeline can no
    /// longer be trusted and the simulation must stop.
    #[error("learning pipeline failure for agent {agent_id}: {reason}")]
    LearningPipeline {
        /// Agent whose result could not be applied.
        agent_id: EntityId,
        /// Underlying cause.
        reason: String,
    },
}

impl PolicyError {
    /// Whether this error must stop the whole simulation.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::LearningPipeline { .. })
    }
}
