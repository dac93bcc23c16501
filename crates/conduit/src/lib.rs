//! # Conduit
//!
//! **Pooled HTTP/1.1 client and server with a service chain and streaming entities**
//!
//! - **Client** – a `WebClient` whose requests pass through an ordered chain
//!   of services before a pooled transport sends them
//! - **Connection pool** – keyed by scheme, host, port and TLS settings, with
//!   idle limits, lease limits and an idle reaper
//! - **Streaming entities** – chunked uploads and downloads, NDJSON and JSON
//!   array items parsed as they arrive
//! - **Server** – routing with handlers that may pass a request on, request
//!   timeouts and graceful shutdown
//! - **Observability** – `tracing` logs and Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conduit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routing = Routing::builder()
//!         .get("/hello", |_req: ServerRequest| async move {
//!             Ok(ServerResponse::ok().body("hello"))
//!         })
//!         .build();
//!     let server = Server::builder().http_addr("127.0.0.1:0").routing(routing).build();
//!     let handle = server.start().await?;
//!
//!     let client = WebClient::builder()
//!         .base_uri(handle.base_uri())
//!         .service(TracingService::new())
//!         .build()?;
//!     let text = client.get().path("/hello").send().await?.text().await?;
//!     assert_eq!(text, "hello");
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! ClientRequest → service 1 → … → service N → Transport → Pool → wire
//!                                                                  ↓
//! ServiceResponse ← service 1 ← … ← service N ← entity (lazy) ←────┘
//! ```

#![doc(html_root_url = "https://docs.rs/conduit/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Entities, errors and codecs
pub use conduit_core as core;

// Connection pool
pub use conduit_pool as pool;

// Client and its services
pub use conduit_client as client;

// Server and routing
pub use conduit_server as server;

// Configuration loading
pub use conduit_config as config;

// Logging and metrics
pub use conduit_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use conduit::prelude::*;
/// ```
pub mod prelude {
    pub use conduit_core::{
        ConduitError, ConduitResult, EntityWriter, ErrorKind, MediaSupport, OutboundEntity,
        QueryParams, ReadableEntity, RequestId,
    };

    pub use conduit_client::services::{
        MapRequestService, MetricsService, OutboundEnv, OutboundSecurityProvider,
        OutboundSecurityService, RetryService, TracingService,
    };
    pub use conduit_client::{
        Chain, ClientRequest, ServiceRequest, ServiceResponse, TlsConfig, WebClient,
        WebClientBuilder, WebClientService,
    };

    pub use conduit_server::{
        HandlerOutcome, Routing, Server, ServerBuilder, ServerHandle, ServerRequest, ServerResponse,
    };

    pub use conduit_config::{ConduitConfig, ConfigLoader};
    pub use conduit_telemetry::init_telemetry;
}
