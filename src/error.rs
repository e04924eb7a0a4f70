//! Error types for probecache.
//!
//! The cache itself has no failure modes: `get`, `set`, `invalidate`,
//! `clear`, `stats`, and `close` are total functions. Errors exist for
//! [`Runner`](crate::runner::Runner) implementors, and the decorator
//! propagates them verbatim - a failing probe behaves identically whether or
//! not caching is present, and failures are never cached.

use thiserror::Error;

/// Result type alias for probecache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for probecache.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to establish or use a connection to a target.
    #[error("Failed to connect to '{host}': {message}")]
    Connection {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// A probe operation failed on the target.
    #[error("Probe '{operation}' failed on '{host}': {message}")]
    Probe {
        /// Target host
        host: String,
        /// Probe operation name
        operation: String,
        /// Error message
        message: String,
    },

    /// A probe produced output that could not be interpreted.
    #[error("Unparseable output from '{operation}' on '{host}': {message}")]
    ProbeOutput {
        /// Target host
        host: String,
        /// Probe operation name
        operation: String,
        /// Error message
        message: String,
    },
}

impl Error {
    /// Shorthand for a probe failure.
    pub fn probe(
        host: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Probe {
            host: host.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}
