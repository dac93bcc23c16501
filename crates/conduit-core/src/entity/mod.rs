//! Streaming entity transfer.
//!
//! Outbound entities are either in memory ([`OutboundEntity::Buffered`],
//! [`OutboundEntity::Structured`]) and sent with a known length, or produced
//! incrementally ([`OutboundEntity::Streaming`], [`OutboundEntity::Stream`])
//! and sent chunked. A streaming producer writes through an [`EntityWriter`]
//! backed by a bounded channel: when the channel is full, `write` waits until
//! the transport has pulled a chunk.
//!
//! Inbound entities are wrapped in a [`ReadableEntity`] that can be consumed
//! exactly once, either whole (`bytes`, `text`, `json`, `decode`) or
//! incrementally (`chunks`, `items`).

mod items;
mod outbound;
mod readable;

pub use items::ItemStream;
pub use outbound::{ByteStream, EntityBody, EntityWriter, OutboundEntity, DEFAULT_STREAM_BUFFER};
pub use readable::{ChunkStream, ReadableEntity, DEFAULT_MAX_ITEM_SIZE};
