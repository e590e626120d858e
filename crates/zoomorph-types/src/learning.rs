//! Learning samples and the hyperparameter snapshot shipped with each
//! learning request.
//!
//! Both types are plain serializable values: they cross the process
//! boundary to the learning workers, so they never hold references into
//! simulation state.

use serde::{Deserialize, Serialize};

/// One complete `(state, action, reward, next_state)` learning sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// Perception vector observed when the action was chosen.
    pub state: Vec<f32>,
    /// Index of the chosen action (see [`crate::Action::index`]).
    pub action: usize,
    /// Reward observed one tick later.
    pub reward: f32,
    /// Perception vector observed one tick later.
    pub next_state: Vec<f32>,
}

/// The first half of an [`Experience`]: the action is chosen before its
/// consequence is known, so reward and next state are filled in one tick
/// later by [`PendingExperience::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExperience {
    /// Perception vector observed when the action was chosen.
    pub state: Vec<f32>,
    /// Index of the chosen action.
    pub action: usize,
}

impl PendingExperience {
    /// Start a sample for an action whose outcome is not yet known.
    pub const fn new(state: Vec<f32>, action: usize) -> Self {
        Self { state, action }
    }

    /// Finish the sample once the reward and next state are known.
    pub fn complete(self, reward: f32, next_state: Vec<f32>) -> Experience {
        Experience {
            state: self.state,
            action: self.action,
            reward,
            next_state,
        }
    }
}

/// Scalar hyperparameters an organism attaches to every learning request.
///
/// A worker needs nothing else from the organism to run a training step,
/// so no shared mutable state crosses the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnHyperparams {
    /// Discount factor applied to the bootstrapped next-state value.
    pub gamma: f32,
    /// Maximum global gradient norm.
    pub gradient_clip: f32,
    /// Optimiser learning rate.
    pub learning_rate: f32,
    /// Copy the online network into the target network every this many steps.
    pub target_update: u64,
    /// Publish fresh inference weights every this many steps.
    pub inference_update: u64,
}

impl Default for LearnHyperparams {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            gradient_clip: 1.0,
            learning_rate: 0.001,
            target_update: 50,
            inference_update: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_experience_completes() {
        let pending = PendingExperience::new(vec![0.5, 0.25], 3);
        let done = pending.complete(-0.666, vec![0.1, 0.2]);
        assert_eq!(done.action, 3);
        assert_eq!(done.state, vec![0.5, 0.25]);
        assert_eq!(done.next_state, vec![0.1, 0.2]);
        assert!((done.reward - -0.666).abs() < f32::EPSILON);
    }

    #[test]
    fn hyperparams_survive_json() {
        let params = LearnHyperparams {
            target_update: 7,
            ..LearnHyperparams::default()
        };
        let json = serde_json::to_string(&params).unwrap_or_default();
        let back: Option<LearnHyperparams> = serde_json::from_str(&json).ok();
        assert_eq!(back, Some(params));
    }
}
