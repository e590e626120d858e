//! Values exchanged with learning workers, and the dispatch seam.
//!
//! A [`LearnRequest`] carries everything a worker needs for one training
//! step: the hyperparameter snapshot, the batch, and the store indices of
//! the batch items. The reply ([`LearnOutcome`]) carries TD errors keyed
//! by those same indices, so the store can be updated whenever the reply
//! arrives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use zoomorph_types::{Experience, LearnHyperparams};

use crate::error::PolicyError;
use crate::model::ModelWeights;

/// One fire-and-forget training request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnRequest {
    /// Hyperparameters in effect when the batch was drawn.
    pub hyperparams: LearnHyperparams,
    /// Sampled experiences.
    pub batch: Vec<Experience>,
    /// Experience store index of each batch item.
    pub indices: Vec<usize>,
}

/// Scalar statistics of one training step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainMetrics {
    /// Mean smooth-L1 loss over the batch.
    pub loss: f32,
    /// Mean predicted value of the taken actions.
    pub mean_q: f32,
    /// Step number this result belongs to.
    pub step: u64,
    /// Whether the target network was synchronised on this step.
    pub target_updated: bool,
    /// Whether inference weights were published on this step.
    pub weights_published: bool,
}

/// Worker-side result of a successful training step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutput {
    /// Scalar statistics.
    pub metrics: TrainMetrics,
    /// New inference weights, if this step published them.
    pub weights: Option<ModelWeights>,
    /// Absolute TD error keyed by experience store index.
    pub errors: BTreeMap<usize, f32>,
}

/// What comes back for one [`LearnRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LearnOutcome {
    /// The step ran.
    Trained(TrainOutput),
    /// The worker could not run the step.
    Failed {
        /// Worker-side error message.
        message: String,
    },
}

/// Non-blocking sink for learning requests.
pub trait LearnSink: Send + Sync {
    /// Hand a request to the worker that owns this agent. Must not block.
    fn submit(&self, request: LearnRequest) -> Result<(), PolicyError>;
}

/// The channel pair a worker pool hands back on registration.
pub struct LearnerChannels {
    /// Where requests go.
    pub requests: Box<dyn LearnSink>,
    /// Where outcomes arrive, in completion order.
    pub results: UnboundedReceiver<LearnOutcome>,
}

impl std::fmt::Debug for LearnerChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnerChannels").finish_non_exhaustive()
    }
}
