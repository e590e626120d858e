//! Error types for the `zoomorph-workers` crate.

use zoomorph_types::EntityId;

/// Errors raised inside a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Reading or writing the protocol stream failed.
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol line could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A worker thread panicked.
    #[error("worker thread '{name}' panicked")]
    ThreadPanicked {
        /// Name of the thread.
        name: String,
    },
}

/// Errors raised by the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was configured with zero workers.
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    /// A worker could not be started.
    #[error("failed to start worker {worker}: {source}")]
    Spawn {
        /// Index of the worker.
        worker: usize,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The agent already has a learner.
    #[error("agent {agent_id} is already registered")]
    AlreadyRegistered {
        /// The agent.
        agent_id: EntityId,
    },

    /// The agent has no learner.
    #[error("agent {agent_id} is not registered")]
    NotRegistered {
        /// The agent.
        agent_id: EntityId,
    },

    /// A worker's command channel is closed.
    #[error("worker {worker} is no longer accepting commands")]
    Disconnected {
        /// Index of the worker.
        worker: usize,
    },
}
