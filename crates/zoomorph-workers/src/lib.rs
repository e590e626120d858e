//! Learning worker pool for the Zoomorph simulation.
//!
//! Training runs off the tick path in a fixed set of workers. Each worker
//! owns, per registered agent, an inbox and one handler thread that runs
//! training steps and posts results. Workers are either child processes
//! speaking line-delimited JSON over stdin/stdout, or threads in the
//! simulation process speaking the same protocol over channels.
//!
//! # Architecture
//!
//! ```text
//! PolicyRuntime --LearnSink--> WorkerHost --WorkerCommand--> WorkerCore
//!                                                              |
//!                                               per-agent handler thread
//!                                                              |
//! PolicyRuntime <--LearnOutcome-- router <--WorkerReply--------+
//! ```
//!
//! # Modules
//!
//! - [`protocol`] -- Command and reply messages, JSON line codec
//! - [`worker`] -- [`WorkerCore`] and the stdio worker entry point
//! - [`host`] -- Parent-side handle on one worker
//! - [`pool`] -- Least-loaded assignment and shutdown ([`WorkerPool`])
//! - [`error`] -- Error types ([`WorkerError`], [`PoolError`])

pub mod error;
pub mod host;
pub mod pool;
pub mod protocol;
pub mod worker;

pub use error::{PoolError, WorkerError};
pub use host::{WorkerHost, WorkerMode};
pub use pool::{PoolConfig, ShutdownReport, WorkerPool};
pub use protocol::{WorkerCommand, WorkerReply};
pub use worker::{WorkerCore, serve_stdio};
