//! Main configuration types.
//!
//! This module provides the top-level [`ConduitConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use conduit_telemetry::{LogFormat, TelemetryConfig};

use crate::{ClientSettings, ConfigError, ServerSettings};

/// Complete Conduit configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use conduit_config::ConduitConfig;
///
/// let config = ConduitConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(config.client.keep_alive);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConduitConfig {
    /// HTTP client configuration.
    #[serde(default)]
    pub client: ClientSettings,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerSettings,

    /// Logging and metrics configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ConduitConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ConduitConfigBuilder {
        ConduitConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base_uri) = &self.client.base_uri {
            if !(base_uri.starts_with("http://") || base_uri.starts_with("https://")) {
                return Err(ConfigError::invalid_value(
                    "client.base_uri",
                    format!("expected an http:// or https:// URI, got {base_uri}"),
                ));
            }
        }

        let zero_fields = [
            ("client.connect_timeout_ms", self.client.connect_timeout_ms == 0),
            ("client.max_connections_per_key", self.client.max_connections_per_key == 0),
            ("client.max_connections", self.client.max_connections == 0),
            ("client.stream_buffer", self.client.stream_buffer == 0),
            ("client.reap_interval_secs", self.client.reap_interval_secs == 0),
            ("server.request_timeout_ms", self.server.request_timeout_ms == 0),
            ("server.max_connections", self.server.max_connections == 0),
            ("server.stream_buffer", self.server.stream_buffer == 0),
        ];
        if let Some((field, _)) = zero_fields.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::invalid_value(*field, "must be at least 1"));
        }

        if self.client.read_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "client.read_timeout_ms",
                "must be at least 1, or unset to wait indefinitely",
            ));
        }

        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.telemetry.logging.enabled {
            conduit_telemetry::logging::create_env_filter(&self.telemetry.logging.level)
                .map_err(|e| ConfigError::invalid_value("telemetry.logging.level", e.to_string()))?;
        }

        if let Some(addr) = &self.telemetry.metrics.listen_addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::invalid_value(
                    "telemetry.metrics.listen_addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, a loopback bind address and a small idle pool.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi = true;
        config.telemetry.logging.include_location = true;

        config.server.http_addr = "127.0.0.1:8080".to_string();
        config.client.max_idle_per_key = 2;

        config
    }

    /// Production preset: JSON logs at `info`.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi = false;

        config
    }
}

/// Builder for [`ConduitConfig`].
#[derive(Debug, Default)]
pub struct ConduitConfigBuilder {
    client: Option<ClientSettings>,
    server: Option<ServerSettings>,
    telemetry: Option<TelemetryConfig>,
}

impl ConduitConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client configuration.
    #[must_use]
    pub fn client(mut self, client: ClientSettings) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerSettings) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration; unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> ConduitConfig {
        ConduitConfig {
            client: self.client.unwrap_or_default(),
            server: self.server.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<ConduitConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConduitConfig::default().validate().is_ok());
        assert!(ConduitConfig::development().validate().is_ok());
        assert!(ConduitConfig::production().validate().is_ok());
    }

    #[test]
    fn test_builder_keeps_unset_sections_default() {
        let config = ConduitConfig::builder()
            .client(ClientSettings {
                max_idle_per_key: 1,
                ..Default::default()
            })
            .build();

        assert_eq!(config.client.max_idle_per_key, 1);
        assert_eq!(config.server, ServerSettings::default());
    }

    #[test]
    fn test_validate_base_uri_scheme() {
        let result = ConduitConfig::builder()
            .client(ClientSettings {
                base_uri: Some("ftp://files.local".to_string()),
                ..Default::default()
            })
            .build_validated();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("client.base_uri"));
    }

    #[test]
    fn test_validate_zero_limits() {
        let config = ConduitConfig::builder()
            .client(ClientSettings {
                max_connections_per_key: 0,
                ..Default::default()
            })
            .build();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_connections_per_key"));

        let config = ConduitConfig::builder()
            .client(ClientSettings {
                read_timeout_ms: Some(0),
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_server_addr() {
        let config = ConduitConfig::builder()
            .server(ServerSettings {
                http_addr: "not-an-address".to_string(),
                ..Default::default()
            })
            .build();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http_addr"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ConduitConfig::default();
        config.telemetry.logging.level = "conduit=loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_development_preset() {
        let config = ConduitConfig::development();
        assert_eq!(config.telemetry.logging.level, "debug");
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    }
}
