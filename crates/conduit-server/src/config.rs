//! Server configuration.
//!
//! ```rust
//! use conduit_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("127.0.0.1:0")
//!     .request_timeout(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(config.http_addr(), "127.0.0.1:0");
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use conduit_config::ServerSettings;
use conduit_core::DEFAULT_STREAM_BUFFER;

use crate::error::{ServerError, ServerResult};

/// Default bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default handler timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Server configuration. Use [`ServerConfig::builder()`] to construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    http_addr: String,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    max_connections: Option<usize>,
    keep_alive: bool,
    stream_buffer: usize,
}

impl ServerConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the bind address as configured.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Parses the bind address.
    pub fn socket_addr(&self) -> ServerResult<SocketAddr> {
        self.http_addr
            .parse()
            .map_err(|source| ServerError::InvalidAddress {
                addr: self.http_addr.clone(),
                source,
            })
    }

    /// Returns how long a handler may run before the server answers 504.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns how long shutdown waits for open connections.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the connection limit, if any.
    #[must_use]
    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    /// Returns whether connections serve more than one request.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns how many chunks a streaming response may buffer.
    #[must_use]
    pub fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self::builder()
            .http_addr(settings.http_addr.clone())
            .request_timeout(Duration::from_millis(settings.request_timeout_ms))
            .shutdown_timeout(Duration::from_secs(settings.shutdown_timeout_secs))
            .max_connections(Some(settings.max_connections))
            .keep_alive(settings.keep_alive)
            .stream_buffer(settings.stream_buffer)
            .build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig {
                http_addr: DEFAULT_HTTP_ADDR.to_string(),
                request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
                shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
                max_connections: None,
                keep_alive: true,
                stream_buffer: DEFAULT_STREAM_BUFFER,
            },
        }
    }

    /// Sets the bind address; port 0 picks a free port.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Sets the handler timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Limits concurrently served connections; `None` is unlimited.
    #[must_use]
    pub fn max_connections(mut self, max: Option<usize>) -> Self {
        self.config.max_connections = max.filter(|max| *max > 0);
        self
    }

    /// Enables or disables HTTP keep-alive.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Sets how many chunks a streaming response may buffer.
    #[must_use]
    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.config.stream_buffer = buffer.max(1);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl From<ServerConfig> for ServerConfigBuilder {
    fn from(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr(), DEFAULT_HTTP_ADDR);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.keep_alive());
        assert_eq!(config.max_connections(), None);
    }

    #[test]
    fn test_invalid_address() {
        let config = ServerConfig::builder().http_addr("not-an-address").build();
        assert!(matches!(
            config.socket_addr(),
            Err(ServerError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_from_settings() {
        let settings = ServerSettings {
            http_addr: "127.0.0.1:0".to_string(),
            request_timeout_ms: 1500,
            shutdown_timeout_secs: 2,
            max_connections: 16,
            keep_alive: false,
            stream_buffer: 0,
        };
        let config = ServerConfig::from(&settings);
        assert_eq!(config.socket_addr().unwrap().port(), 0);
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_connections(), Some(16));
        assert!(!config.keep_alive());
        assert_eq!(config.stream_buffer(), 1);
    }
}
