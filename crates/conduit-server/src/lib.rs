//! # Conduit Server
//!
//! The server side of the Conduit pipeline:
//!
//! - [`Routing`] - Handlers matched by method and path pattern in declaration order
//! - [`Server`] / [`ServerHandle`] - HTTP/1.1 over hyper with graceful shutdown
//! - [`ServerRequest`] / [`ServerResponse`] - Streaming inbound and outbound entities
//!
//! Handler failures become JSON error responses: entity conversion errors are
//! answered with 400, handler timeouts with 504 and other failures with the
//! status of their [`ErrorKind`](conduit_core::ErrorKind).
//!
//! ## Example
//!
//! ```rust,ignore
//! use conduit_server::{Routing, Server, ServerRequest, ServerResponse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routing = Routing::builder()
//!         .post("/echo", |mut req: ServerRequest| async move {
//!             let body = req.bytes().await?;
//!             Ok(ServerResponse::ok().body(body))
//!         })
//!         .build();
//!
//!     Server::builder()
//!         .http_addr("0.0.0.0:8080")
//!         .routing(routing)
//!         .build()
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/conduit-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
mod request;
mod response;
pub mod routing;
mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use request::ServerRequest;
pub use response::ServerResponse;
pub use routing::{Handler, HandlerOutcome, PathPattern, Routing, RoutingBuilder};
pub use server::{Server, ServerBuilder, ServerHandle};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
