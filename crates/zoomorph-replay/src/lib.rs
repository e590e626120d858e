//! Prioritized experience store for the Zoomorph simulation.
//!
//! Each organism owns one [`ExperienceStore`]: a small FIFO of recent
//! experiences in front of a sum-indexed priority tree. Experiences are
//! referenced outside the store only by opaque slot index, so priority
//! updates computed by an asynchronous learning worker can be applied long
//! after the batch was drawn.
//!
//! # Modules
//!
//! - [`sum_tree`] -- Array-backed sum tree with iterative propagation
//! - [`store`] -- The hybrid recent/prioritized store ([`ExperienceStore`])
//! - [`error`] -- Error types ([`ReplayError`])

pub mod error;
pub mod store;
pub mod sum_tree;

pub use error::ReplayError;
pub use store::{ExperienceStore, ReplayConfig, SampledBatch};
pub use sum_tree::SumTree;
