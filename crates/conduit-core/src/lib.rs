//! # Conduit Core
//!
//! Foundational types shared by the Conduit client, pool and server crates:
//!
//! - [`ConduitError`] - The error taxonomy and its [`ErrorKind`] classification
//! - [`RequestId`] - Monotonic, process-unique request identifier
//! - [`QueryParams`] - Multi-valued query parameters
//! - [`MediaSupport`] - Explicitly registered media codecs (JSON, plain text)
//! - [`OutboundEntity`] / [`EntityWriter`] - Entities written with backpressure
//! - [`ReadableEntity`] - Inbound entities consumed exactly once

#![doc(html_root_url = "https://docs.rs/conduit-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod entity;
mod error;
pub mod media;
mod query;
mod request_id;

use std::future::Future;
use std::pin::Pin;

pub use entity::{
    ByteStream, ChunkStream, EntityBody, EntityWriter, ItemStream, OutboundEntity, ReadableEntity,
    DEFAULT_MAX_ITEM_SIZE, DEFAULT_STREAM_BUFFER,
};
pub use error::{BoxError, ConduitError, ConduitResult, ErrorKind};
pub use media::{JsonCodec, MediaCodec, MediaSupport, TextCodec};
pub use query::QueryParams;
pub use request_id::RequestId;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
