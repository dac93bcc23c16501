//! Client options.

use std::time::Duration;

use conduit_config::ClientSettings;
use conduit_core::DEFAULT_STREAM_BUFFER;
use conduit_pool::PoolConfig;

/// Timeouts, pool limits and transfer options of a [`WebClient`](crate::WebClient).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use conduit_client::ClientConfig;
///
/// let config = ClientConfig {
///     max_idle_per_key: 1,
///     read_timeout: Some(Duration::from_secs(2)),
///     ..Default::default()
/// };
/// assert_eq!(config.pool_config().max_idle_per_key, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Budget for opening a connection, TLS handshake included.
    pub connect_timeout: Duration,
    /// Budget for the response head and for each body frame; `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Idle connections kept per key.
    pub max_idle_per_key: usize,
    /// How long an idle connection may wait for reuse.
    pub idle_timeout: Duration,
    /// Connections leased at once per key.
    pub max_connections_per_key: usize,
    /// Connections leased at once across all keys.
    pub max_connections: usize,
    /// How long a request waits for a free connection slot.
    pub acquire_timeout: Duration,
    /// Reuse connections across requests.
    pub keep_alive: bool,
    /// Chunks a streaming producer may run ahead of the transport.
    pub stream_buffer: usize,
    /// Period of the idle connection sweep.
    pub reap_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            connect_timeout: pool.connect_timeout,
            read_timeout: Some(Duration::from_secs(30)),
            max_idle_per_key: pool.max_idle_per_key,
            idle_timeout: pool.idle_timeout,
            max_connections_per_key: pool.max_connections_per_key,
            max_connections: pool.max_connections,
            acquire_timeout: pool.acquire_timeout,
            keep_alive: true,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            reap_interval: pool.reap_interval,
        }
    }
}

impl ClientConfig {
    /// Returns the pool part of the configuration.
    ///
    /// With keep-alive off nothing is kept idle.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle_per_key: if self.keep_alive {
                self.max_idle_per_key
            } else {
                0
            },
            idle_timeout: self.idle_timeout,
            max_connections_per_key: self.max_connections_per_key,
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
            connect_timeout: self.connect_timeout,
            reap_interval: self.reap_interval,
        }
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            read_timeout: settings.read_timeout_ms.map(Duration::from_millis),
            max_idle_per_key: settings.max_idle_per_key,
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            max_connections_per_key: settings.max_connections_per_key,
            max_connections: settings.max_connections,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            keep_alive: settings.keep_alive,
            stream_buffer: settings.stream_buffer.max(1),
            reap_interval: Duration::from_secs(settings.reap_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = ClientSettings {
            connect_timeout_ms: 250,
            read_timeout_ms: None,
            max_idle_per_key: 1,
            ..Default::default()
        };
        let config = ClientConfig::from(&settings);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.max_idle_per_key, 1);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_keep_alive_off_disables_idle_pool() {
        let config = ClientConfig {
            keep_alive: false,
            ..Default::default()
        };
        assert_eq!(config.pool_config().max_idle_per_key, 0);
    }
}
