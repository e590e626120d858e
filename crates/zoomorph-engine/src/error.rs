//! Error types for the simulation binary.
//!
//! [`EngineError`] wraps every failure mode of start-up, the run itself,
//! and the worker sub-mode, so `main` can propagate with `?`.

/// Top-level error for the simulation binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: zoomorph_core::config::ConfigError,
    },

    /// Building or populating the world failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: zoomorph_core::engine::TickError,
    },

    /// The tick driver failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: zoomorph_core::runner::RunnerError,
    },

    /// The learning worker pool could not start.
    #[error("worker pool error: {source}")]
    Pool {
        /// The underlying pool error.
        #[from]
        source: zoomorph_workers::PoolError,
    },

    /// The worker sub-mode failed.
    #[error("worker error: {source}")]
    Worker {
        /// The underlying worker error.
        #[from]
        source: zoomorph_workers::WorkerError,
    },

    /// A runtime or thread could not be created.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The logging subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
