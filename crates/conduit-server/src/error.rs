//! Server error types.

use thiserror::Error;

/// Errors raised while starting or running a [`Server`](crate::Server).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address could not be parsed.
    #[error("invalid bind address '{addr}': {source}")]
    InvalidAddress {
        /// The address as configured.
        addr: String,
        /// The parse failure.
        #[source]
        source: std::net::AddrParseError,
    },

    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The address the server tried to bind.
        addr: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// The accept loop task ended abnormally.
    #[error("server task failed: {0}")]
    Task(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
