//! Error types for Conduit.
//!
//! This module provides the [`ConduitError`] type, the single error type that
//! flows through the client service chain, the connection pool, the entity
//! layer and the server.
//!
//! # Connection-scoped classification
//!
//! Retry logic needs to know whether a request ever reached the remote side.
//! [`ConduitError::connection_established`] answers that question:
//!
//! | Variant | Connection established |
//! |---|---|
//! | `ConnectFailure` | no |
//! | `TlsFailure` | no |
//! | `PoolExhausted` | no |
//! | `InvalidRequest` | no |
//! | `Timeout` (`connect`/`acquire`) | no |
//! | everything else | yes |

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Boxed error used for causes that cross crate boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias using [`ConduitError`].
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Coarse classification of a [`ConduitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport connection could not be established.
    Connect,
    /// TLS handshake or certificate failure.
    Tls,
    /// Malformed framing or an unexpected connection close.
    Protocol,
    /// No pooled connection became available in time.
    PoolExhausted,
    /// The connection pool was shut down.
    PoolClosed,
    /// A service in the chain failed.
    ServiceChain,
    /// A codec could not convert an entity.
    EntityConversion,
    /// An operation exceeded its time budget.
    Timeout,
    /// An inbound entity was read a second time.
    EntityConsumed,
    /// The other side of a streaming entity went away.
    StreamClosed,
    /// The request could not be turned into a wire request.
    InvalidRequest,
    /// The server answered with an error status.
    Status,
    /// Any other I/O failure.
    Io,
}

impl ErrorKind {
    /// Returns a stable, lowercase name usable as a metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Protocol => "protocol",
            Self::PoolExhausted => "pool_exhausted",
            Self::PoolClosed => "pool_closed",
            Self::ServiceChain => "service_chain",
            Self::EntityConversion => "entity_conversion",
            Self::Timeout => "timeout",
            Self::EntityConsumed => "entity_consumed",
            Self::StreamClosed => "stream_closed",
            Self::InvalidRequest => "invalid_request",
            Self::Status => "status",
            Self::Io => "io",
        }
    }

    /// Returns the HTTP status a server should answer with when a handler
    /// fails with an error of this kind.
    #[must_use]
    pub const fn default_status_code(self) -> StatusCode {
        match self {
            Self::EntityConversion | Self::InvalidRequest | Self::EntityConsumed => {
                StatusCode::BAD_REQUEST
            }
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Connect | Self::Tls | Self::Protocol | Self::PoolExhausted | Self::PoolClosed => {
                StatusCode::BAD_GATEWAY
            }
            Self::ServiceChain | Self::StreamClosed | Self::Status | Self::Io => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for Conduit.
///
/// # Example
///
/// ```
/// use conduit_core::{ConduitError, ErrorKind};
///
/// let err = ConduitError::service("auth", "token expired");
/// assert_eq!(err.kind(), ErrorKind::ServiceChain);
/// assert!(err.to_string().contains("auth"));
/// ```
#[derive(Error, Debug)]
pub enum ConduitError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    ConnectFailure {
        /// `host:port` of the remote endpoint.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed: {source}")]
    TlsFailure {
        /// `host:port` of the remote endpoint.
        endpoint: String,
        /// Underlying handshake error.
        #[source]
        source: std::io::Error,
    },

    /// The peer sent something that is not valid HTTP/1.1, or closed the
    /// connection mid-exchange.
    #[error("protocol error: {message}")]
    ProtocolError {
        /// Human-readable description.
        message: String,
        /// Underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// No connection became available within the wait budget.
    #[error("connection pool exhausted for {key} after waiting {waited:?}")]
    PoolExhausted {
        /// Display form of the connection key.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The connection pool no longer hands out connections.
    #[error("connection pool is shut down")]
    PoolClosed,

    /// A service in the client chain failed.
    #[error("service '{service}' failed: {source}")]
    ServiceChainFailure {
        /// Name of the failing service.
        service: String,
        /// The error raised by the service.
        #[source]
        source: BoxError,
    },

    /// An entity could not be converted by the registered codecs.
    #[error("entity conversion failed: {message}")]
    EntityConversion {
        /// Human-readable description.
        message: String,
        /// Underlying codec error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out (`connect`, `read`, `request`, ...).
        operation: &'static str,
        /// The configured budget.
        after: Duration,
    },

    /// The inbound entity has already been consumed.
    #[error("entity has already been consumed")]
    EntityConsumed,

    /// The consumer of a streaming entity went away.
    #[error("entity stream closed by the consumer")]
    StreamClosed,

    /// The request cannot be sent as built.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Human-readable description.
        message: String,
    },

    /// The server answered with a client or server error status.
    #[error("{method} {uri} returned {status}")]
    Status {
        /// Request method.
        method: http::Method,
        /// Request URI.
        uri: String,
        /// Response status.
        status: StatusCode,
    },

    /// Any other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConduitError {
    /// Creates a connect failure.
    #[must_use]
    pub fn connect(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        Self::ConnectFailure {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a TLS failure.
    #[must_use]
    pub fn tls(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        Self::TlsFailure {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a protocol error without a cause.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a protocol error with a cause.
    pub fn protocol_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a pool exhausted error.
    #[must_use]
    pub fn pool_exhausted(key: impl Into<String>, waited: Duration) -> Self {
        Self::PoolExhausted {
            key: key.into(),
            waited,
        }
    }

    /// Creates a service chain failure carrying `source` as its cause.
    pub fn service(service: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ServiceChainFailure {
            service: service.into(),
            source: source.into(),
        }
    }

    /// Creates an entity conversion error without a cause.
    #[must_use]
    pub fn entity_conversion(message: impl Into<String>) -> Self {
        Self::EntityConversion {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an entity conversion error with a cause.
    pub fn entity_conversion_with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::EntityConversion {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectFailure { .. } => ErrorKind::Connect,
            Self::TlsFailure { .. } => ErrorKind::Tls,
            Self::ProtocolError { .. } => ErrorKind::Protocol,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::ServiceChainFailure { .. } => ErrorKind::ServiceChain,
            Self::EntityConversion { .. } => ErrorKind::EntityConversion,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::EntityConsumed => ErrorKind::EntityConsumed,
            Self::StreamClosed => ErrorKind::StreamClosed,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Status { .. } => ErrorKind::Status,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns `false` when the request never reached the remote side, which
    /// makes it safe to retry regardless of method idempotency.
    #[must_use]
    pub fn connection_established(&self) -> bool {
        match self {
            Self::ConnectFailure { .. }
            | Self::TlsFailure { .. }
            | Self::PoolExhausted { .. }
            | Self::PoolClosed
            | Self::InvalidRequest { .. } => false,
            Self::Timeout { operation, .. } => !matches!(*operation, "connect" | "acquire"),
            _ => true,
        }
    }

    /// Returns `true` for failures that happened before the request reached
    /// the remote side and may go away on another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectFailure { .. } | Self::TlsFailure { .. } | Self::PoolExhausted { .. } => {
                true
            }
            Self::Timeout { operation, .. } => matches!(*operation, "connect" | "acquire"),
            _ => false,
        }
    }

    /// Returns `true` for timeouts of any operation.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the name of the failing service for chain failures.
    #[must_use]
    pub fn failed_service(&self) -> Option<&str> {
        match self {
            Self::ServiceChainFailure { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Downcasts the cause of a service chain failure.
    ///
    /// ```
    /// use conduit_core::ConduitError;
    ///
    /// let err = ConduitError::service("signer", std::io::Error::other("boom"));
    /// let io = err.service_cause::<std::io::Error>().unwrap();
    /// assert_eq!(io.to_string(), "boom");
    /// ```
    #[must_use]
    pub fn service_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::ServiceChainFailure { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connect_failure_is_not_established() {
        let err = ConduitError::connect(
            "localhost:1",
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        );
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(!err.connection_established());
        assert!(err.to_string().contains("localhost:1"));
    }

    #[test]
    fn test_tls_failure_is_distinct_from_io() {
        let err = ConduitError::tls("example.com:443", std::io::Error::other("bad cert"));
        assert_eq!(err.kind(), ErrorKind::Tls);
        assert_ne!(err.kind(), ErrorKind::Io);
        assert!(!err.connection_established());
    }

    #[test]
    fn test_protocol_error_is_established() {
        let err = ConduitError::protocol("invalid status line");
        assert!(err.connection_established());
        assert!(err.source().is_none());

        let err = ConduitError::protocol_with_source("closed", std::io::Error::other("eof"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_timeout_classification() {
        let connect = ConduitError::timeout("connect", Duration::from_millis(50));
        assert!(connect.is_timeout());
        assert!(!connect.connection_established());

        let read = ConduitError::timeout("read", Duration::from_millis(50));
        assert!(read.connection_established());
        assert!(read.to_string().contains("read timed out"));
    }

    #[test]
    fn test_service_failure_carries_cause() {
        let err = ConduitError::service("signer", "boom");
        assert_eq!(err.failed_service(), Some("signer"));
        assert_eq!(err.source().map(ToString::to_string), Some("boom".to_string()));
        assert!(err.service_cause::<std::io::Error>().is_none());
    }

    #[test]
    fn test_pool_exhausted_message() {
        let err = ConduitError::pool_exhausted("http://localhost:8080", Duration::from_millis(10));
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
        assert!(err.to_string().contains("http://localhost:8080"));
    }

    #[test]
    fn test_pool_closed_was_never_connected() {
        let err = ConduitError::PoolClosed;
        assert_eq!(err.kind(), ErrorKind::PoolClosed);
        assert!(!err.connection_established());
        assert!(!err.is_retryable());
        assert!(ConduitError::pool_exhausted("k", Duration::ZERO).is_retryable());
        assert!(!ConduitError::invalid_request("bad").is_retryable());
        assert!(!ConduitError::timeout("read", Duration::ZERO).is_retryable());
    }

    #[test]
    fn test_kind_status_codes() {
        assert_eq!(
            ErrorKind::EntityConversion.default_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ErrorKind::Timeout.default_status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ErrorKind::Connect.default_status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorKind::Tls.as_str(), "tls");
    }
}
