//! The policy model capability.
//!
//! A [`PolicyModel`] maps a perception vector to one value per action and
//! can run one training step on a batch of experiences. Implementations
//! must be buildable from a serializable [`ModelSpec`] so a learning worker
//! in another process can construct its own copy.

use serde::{Deserialize, Serialize};
use zoomorph_types::{Experience, LearnHyperparams};

use crate::error::PolicyError;
use crate::learn::TrainMetrics;

/// Shape of a policy network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Length of the perception vector.
    pub input_size: usize,
    /// Width of each hidden layer.
    pub hidden_size: usize,
    /// Number of hidden layers.
    pub hidden_layers: usize,
    /// Number of outputs (one per action).
    pub output_size: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl ModelSpec {
    /// Check that every dimension is non-zero.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(PolicyError::InvalidSpec {
                reason: format!(
                    "input ({}) and output ({}) sizes must be non-zero",
                    self.input_size, self.output_size
                ),
            });
        }
        if self.hidden_layers > 0 && self.hidden_size == 0 {
            return Err(PolicyError::InvalidSpec {
                reason: "hidden_size must be non-zero when hidden layers are requested".to_owned(),
            });
        }
        Ok(())
    }
}

/// Weights and bias of one dense layer, row-major (`outputs` rows of
/// `inputs` columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    /// Number of inputs to the layer.
    pub inputs: usize,
    /// Number of outputs of the layer.
    pub outputs: usize,
    /// `outputs * inputs` weights.
    pub weights: Vec<f32>,
    /// `outputs` biases.
    pub bias: Vec<f32>,
}

/// A complete, self-contained set of model parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelWeights {
    /// Layers in forward order.
    pub layers: Vec<LayerWeights>,
}

/// Result of one training step.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainStep {
    /// Scalar statistics for the step.
    pub metrics: TrainMetrics,
    /// Fresh inference weights, present when the step publishes them.
    pub weights: Option<ModelWeights>,
    /// Absolute TD error per batch position.
    pub errors: Vec<f32>,
}

/// A trainable action-value model.
pub trait PolicyModel: Send + Sync {
    /// Forward pass: one value per action.
    fn infer(&self, input: &[f32]) -> Result<Vec<f32>, PolicyError>;

    /// Run one optimisation step on `batch`.
    ///
    /// `step` is the 1-based count of steps this model has been asked to
    /// run; it drives target-network and weight-publication cadences.
    fn train_step(
        &mut self,
        hyperparams: &LearnHyperparams,
        batch: &[Experience],
        step: u64,
    ) -> Result<TrainStep, PolicyError>;

    /// Replace the parameters with `weights`.
    fn load_weights(&mut self, weights: &ModelWeights) -> Result<(), PolicyError>;

    /// Copy out the current parameters.
    fn weights(&self) -> ModelWeights;
}

/// Builds fresh models from a spec. Shared by the policy runtime (two
/// inference buffers per agent) and the learning workers (one learner per
/// agent).
pub trait ModelFactory: Send + Sync {
    /// Construct a model with freshly initialised parameters.
    fn build(&self, spec: &ModelSpec) -> Result<Box<dyn PolicyModel>, PolicyError>;
}
