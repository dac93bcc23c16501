//! Configuration schema types.
//!
//! Durations are expressed as integer milliseconds or seconds, with the unit
//! in the field name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// HTTP client configuration section.
///
/// # Example
///
/// ```
/// use conduit_config::ClientSettings;
///
/// let settings = ClientSettings {
///     base_uri: Some("http://localhost:8080".to_string()),
///     max_idle_per_key: 1,
///     ..Default::default()
/// };
/// assert_eq!(settings.connect_timeout_ms, 10_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientSettings {
    /// Base URI that relative request paths resolve against.
    #[serde(default)]
    pub base_uri: Option<String>,

    /// TCP connect (and TLS handshake) timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for response headers and for each body frame, in
    /// milliseconds. `None` waits indefinitely.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: Option<u64>,

    /// Maximum idle connections kept per connection key.
    #[serde(default = "default_max_idle_per_key")]
    pub max_idle_per_key: usize,

    /// Idle connections older than this are closed by the reaper.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Maximum concurrently leased connections per key.
    #[serde(default = "default_max_connections_per_key")]
    pub max_connections_per_key: usize,

    /// Maximum concurrently leased connections across all keys.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long `acquire` waits for a free slot, in milliseconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,

    /// Reuse connections across requests.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Chunks a streaming producer may run ahead of the transport.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Interval between idle reaper runs, in seconds.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Headers added to every request unless the request sets them.
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_uri: None,
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            max_idle_per_key: default_max_idle_per_key(),
            idle_timeout_secs: default_idle_timeout(),
            max_connections_per_key: default_max_connections_per_key(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout(),
            keep_alive: true,
            stream_buffer: default_stream_buffer(),
            reap_interval_secs: default_reap_interval(),
            default_headers: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10_000
}

#[allow(clippy::unnecessary_wraps)]
fn default_read_timeout() -> Option<u64> {
    Some(30_000)
}

fn default_max_idle_per_key() -> usize {
    8
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_max_connections_per_key() -> usize {
    64
}

fn default_max_connections() -> usize {
    512
}

fn default_acquire_timeout() -> u64 {
    5_000
}

fn default_stream_buffer() -> usize {
    8
}

fn default_reap_interval() -> u64 {
    15
}

/// HTTP server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Bind address. Port 0 picks a free port.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Handler timeout in milliseconds; exceeding it answers 504.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long graceful shutdown waits for open connections, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum number of concurrently served connections.
    #[serde(default = "default_server_max_connections")]
    pub max_connections: usize,

    /// Serve several requests per connection.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Chunks a streaming response producer may run ahead of the socket.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            request_timeout_ms: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_connections: default_server_max_connections(),
            keep_alive: true,
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_server_max_connections() -> usize {
    10_000
}
