//! # Conduit Client
//!
//! A pooled HTTP/1.1 client whose requests pass through a chain of
//! [`WebClientService`]s before reaching the network.
//!
//! - [`WebClient`] - Immutable, cheaply cloned client built by [`WebClientBuilder`]
//! - [`ClientRequest`] - Per-request URI, headers, properties, timeout and entity
//! - [`ServiceRequest`] / [`ServiceResponse`] - What services see and return
//! - [`services`] - Metrics, tracing, outbound security, retry and mapping services
//!
//! Connections come from a [`conduit_pool::Pool`] keyed by scheme, host, port
//! and TLS configuration. A connection is leased by exactly one request and
//! returns to the pool once the response entity has been read to the end.
//!
//! # Example
//!
//! ```ignore
//! use conduit_client::{services::TracingService, WebClient};
//!
//! let client = WebClient::builder()
//!     .base_uri("http://inventory:8080")
//!     .service(TracingService::new())
//!     .build()?;
//!
//! let mut response = client
//!     .post()
//!     .path("/items")
//!     .json(&serde_json::json!({ "sku": "A-1" }))
//!     .send()
//!     .await?
//!     .error_for_status()?;
//! let created: serde_json::Value = response.json().await?;
//! ```

#![doc(html_root_url = "https://docs.rs/conduit-client/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod config;
mod connection;
mod request;
mod response;
mod service;
pub mod services;
mod tls;
mod transport;

pub use client::{ClientRequest, WebClient, WebClientBuilder};
pub use config::ClientConfig;
pub use connection::{HttpConnection, HttpConnector};
pub use request::{Phase, RequestSnapshot, ServiceRequest};
pub use response::{ConnectionInfo, ServiceResponse};
pub use service::{Chain, Terminal, WebClientService};
pub use tls::TlsConfig;

pub use conduit_core::{
    ConduitError, ConduitResult, EntityWriter, MediaSupport, OutboundEntity, QueryParams,
    ReadableEntity, RequestId,
};
pub use conduit_pool::{ConnectionKey, PoolStats, Scheme};
