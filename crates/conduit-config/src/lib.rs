//! Typed configuration system for Conduit.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! The root type is [`ConduitConfig`]:
//!
//! - [`ClientSettings`] - Timeouts, pool limits and default headers of the HTTP client
//! - [`ServerSettings`] - Bind address, request timeout and shutdown budget of the server
//! - [`TelemetryConfig`] - Logging and metrics
//!
//! # Configuration File Format
//!
//! ```toml
//! [client]
//! base_uri = "http://orders.internal:8080"
//! connect_timeout_ms = 2000
//! read_timeout_ms = 10000
//! max_idle_per_key = 4
//! idle_timeout_secs = 30
//!
//! [client.default_headers]
//! x-caller = "billing"
//!
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 15000
//!
//! [telemetry.logging]
//! level = "info,conduit_pool=debug"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `CONDUIT__CLIENT__MAX_IDLE_PER_KEY=1`
//! - `CONDUIT__CLIENT__READ_TIMEOUT_MS=none`
//! - `CONDUIT__CLIENT__DEFAULT_HEADERS__X_CALLER=billing`
//! - `CONDUIT__SERVER__HTTP_ADDR=127.0.0.1:9000`
//! - `CONDUIT__TELEMETRY__LOGGING__LEVEL=debug`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{ConduitConfig, ConduitConfigBuilder};
pub use conduit_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{ClientSettings, ServerSettings};
