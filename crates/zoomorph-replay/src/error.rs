//! Error types for the `zoomorph-replay` crate.

/// Errors that can occur when constructing an experience store.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// A size parameter was zero.
    #[error("invalid replay configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}
