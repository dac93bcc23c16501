//! Prometheus metrics for Conduit.
//!
//! Recording goes through the `metrics` facade, so nothing is collected until
//! a recorder is installed with [`init_metrics`].
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `conduit_client_requests_total` | Counter | `method`, `status` |
//! | `conduit_client_request_failures_total` | Counter | `method`, `kind` |
//! | `conduit_client_request_duration_seconds` | Histogram | `method` |
//! | `conduit_client_in_flight_requests` | Gauge | - |
//! | `conduit_pool_connections_opened_total` | Counter | `key` |
//! | `conduit_pool_connections_closed_total` | Counter | `key`, `reason` |
//! | `conduit_pool_connections_reused_total` | Counter | `key` |
//! | `conduit_server_requests_total` | Counter | `method`, `status` |
//! | `conduit_server_request_duration_seconds` | Histogram | `method` |

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;
use crate::TelemetryResult;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    /// Completed client requests.
    pub const CLIENT_REQUESTS: &str = "conduit_client_requests_total";
    /// Client requests that ended in an error.
    pub const CLIENT_FAILURES: &str = "conduit_client_request_failures_total";
    /// Client request latency.
    pub const CLIENT_DURATION: &str = "conduit_client_request_duration_seconds";
    /// Client requests currently in the chain.
    pub const CLIENT_IN_FLIGHT: &str = "conduit_client_in_flight_requests";
    /// Connections opened by the pool.
    pub const POOL_OPENED: &str = "conduit_pool_connections_opened_total";
    /// Connections closed by the pool.
    pub const POOL_CLOSED: &str = "conduit_pool_connections_closed_total";
    /// Idle connections handed out again.
    pub const POOL_REUSED: &str = "conduit_pool_connections_reused_total";
    /// Requests handled by the server.
    pub const SERVER_REQUESTS: &str = "conduit_server_requests_total";
    /// Server handler latency.
    pub const SERVER_DURATION: &str = "conduit_server_request_duration_seconds";
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether a recorder is installed.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address of the Prometheus scrape endpoint. Without one, metrics are
    /// only available through [`render_metrics`].
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Histogram buckets for request durations, in seconds.
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,
}

fn default_true() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: None,
            duration_buckets: default_duration_buckets(),
        }
    }
}

/// Installs the Prometheus recorder.
///
/// With a `listen_addr` the exporter serves `/metrics` itself and must be
/// called from within a Tokio runtime; otherwise the recorder is installed
/// and scraped through [`render_metrics`].
///
/// # Errors
///
/// Returns `TelemetryError` if the address is invalid or a recorder is
/// already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    if !config.duration_buckets.is_empty() {
        for name in [names::CLIENT_DURATION, names::SERVER_DURATION] {
            builder = builder
                .set_buckets_for_metric(Matcher::Full(name.to_string()), &config.duration_buckets)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
    }

    match &config.listen_addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
        None => {
            let handle = builder
                .install_recorder()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let _ = METRICS_HANDLE.set(handle);
        }
    }

    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` unless [`init_metrics`] installed a recorder without a
/// listener.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(names::CLIENT_REQUESTS, "Client requests that received a response");
    describe_counter!(names::CLIENT_FAILURES, "Client requests that failed, by error kind");
    describe_histogram!(names::CLIENT_DURATION, "Client request duration in seconds");
    describe_gauge!(names::CLIENT_IN_FLIGHT, "Client requests currently in progress");
    describe_counter!(names::POOL_OPENED, "Connections opened by the pool");
    describe_counter!(names::POOL_CLOSED, "Connections closed by the pool, by reason");
    describe_counter!(names::POOL_REUSED, "Pooled connections handed out again");
    describe_counter!(names::SERVER_REQUESTS, "Requests handled by the server");
    describe_histogram!(names::SERVER_DURATION, "Server request duration in seconds");
}

/// Records a client request that received a response.
pub fn record_client_request(method: &str, status: u16, duration: Duration) {
    counter!(
        names::CLIENT_REQUESTS,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::CLIENT_DURATION, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Records a client request that ended in an error of `kind`.
pub fn record_client_failure(method: &str, kind: &str, duration: Duration) {
    counter!(
        names::CLIENT_FAILURES,
        "method" => method.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
    histogram!(names::CLIENT_DURATION, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Records a connection opened for `key`.
pub fn record_connection_opened(key: &str) {
    counter!(names::POOL_OPENED, "key" => key.to_string()).increment(1);
}

/// Records a connection closed for `key`.
pub fn record_connection_closed(key: &str, reason: &'static str) {
    counter!(names::POOL_CLOSED, "key" => key.to_string(), "reason" => reason).increment(1);
}

/// Records an idle connection handed out again for `key`.
pub fn record_connection_reused(key: &str) {
    counter!(names::POOL_REUSED, "key" => key.to_string()).increment(1);
}

/// Records a request handled by the server.
pub fn record_server_request(method: &str, status: u16, duration: Duration) {
    counter!(
        names::SERVER_REQUESTS,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::SERVER_DURATION, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Keeps the in-flight gauge incremented while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::CLIENT_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(names::CLIENT_IN_FLIGHT).decrement(1.0);
    }
}
