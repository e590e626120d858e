//! Policy model capability and per-organism policy runtime.
//!
//! The neural network itself is an opaque capability behind the
//! [`PolicyModel`] trait: inference on a fixed-size vector and a training
//! step on a batch. Everything that crosses the boundary to a learning
//! worker ([`LearnRequest`], [`TrainOutput`], [`ModelWeights`]) is a plain
//! serializable value.
//!
//! [`PolicyRuntime`] wraps two model instances per organism. Inference reads
//! the current buffer; trained weights are loaded into the other buffer and
//! the two are flipped, so action selection never waits on training.
//!
//! # Modules
//!
//! - [`model`] -- The [`PolicyModel`] trait, model shapes, weight blobs
//! - [`mlp`] -- Reference fully connected Q-network with a DQN training step
//! - [`learn`] -- Learning request/outcome values and the dispatch seam
//! - [`exploration`] -- Epsilon-greedy with a Boltzmann fallback
//! - [`metrics`] -- Rolling learning statistics
//! - [`runtime`] -- The double-buffered [`PolicyRuntime`]
//! - [`error`] -- Error types ([`PolicyError`])

pub mod error;
pub mod exploration;
pub mod learn;
pub mod metrics;
pub mod mlp;
pub mod model;
pub mod runtime;

pub use error::PolicyError;
pub use exploration::{Exploration, ExplorationConfig};
pub use learn::{LearnOutcome, LearnRequest, LearnSink, LearnerChannels, TrainMetrics, TrainOutput};
pub use metrics::{LearningMetrics, LearningStats};
pub use mlp::{MlpFactory, MlpQNetwork};
pub use model::{LayerWeights, ModelFactory, ModelSpec, ModelWeights, PolicyModel, TrainStep};
pub use runtime::PolicyRuntime;
