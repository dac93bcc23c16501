//! Outbound entities and the HTTP body they are sent through.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use mime::Mime;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BoxError, ConduitError, ConduitResult};
use crate::media::MediaSupport;
use crate::BoxFuture;

/// Default number of chunks a streaming producer may run ahead of the consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 8;

/// A pull-based stream of entity chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

type Producer = Box<dyn FnOnce(EntityWriter) -> BoxFuture<'static, ConduitResult<()>> + Send>;

/// The entity of an outbound request or response.
///
/// # Example
///
/// ```
/// use conduit_core::OutboundEntity;
///
/// let entity = OutboundEntity::buffered("hello");
/// assert_eq!(entity.content_length(), Some(5));
/// assert!(entity.is_replayable());
///
/// let streamed = OutboundEntity::streaming(|writer| async move {
///     writer.write("chunk").await
/// });
/// assert_eq!(streamed.content_length(), None);
/// assert!(!streamed.is_replayable());
/// ```
#[derive(Default)]
pub enum OutboundEntity {
    /// No entity.
    #[default]
    Empty,
    /// An in-memory entity sent with `Content-Length`.
    Buffered(Bytes),
    /// A structured value encoded by the codec matching the content type.
    Structured(serde_json::Value),
    /// A producer writing chunks through an [`EntityWriter`]; sent chunked.
    Streaming(Producer),
    /// A stream of chunks pulled by the transport; sent chunked.
    Stream(ByteStream),
}

impl OutboundEntity {
    /// Creates a buffered entity.
    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self::Buffered(bytes.into())
    }

    /// Creates a structured entity from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> ConduitResult<Self> {
        serde_json::to_value(value).map(Self::Structured).map_err(|e| {
            ConduitError::entity_conversion_with_source("cannot convert value to an entity", e)
        })
    }

    /// Creates a streaming entity from a write callback.
    ///
    /// The callback runs on its own task once the transport starts sending.
    /// Returning an error aborts the transfer.
    pub fn streaming<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(EntityWriter) -> Fut + Send + 'static,
        Fut: Future<Output = ConduitResult<()>> + Send + 'static,
    {
        Self::Streaming(Box::new(move |writer| Box::pin(producer(writer))))
    }

    /// Creates a streaming entity from a stream of chunks.
    pub fn stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes>,
        E: Into<BoxError>,
    {
        Self::Stream(Box::pin(
            stream.map(|item| item.map(Into::into).map_err(Into::into)),
        ))
    }

    /// Returns `true` if there is no entity.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if the entity can be sent more than once.
    #[must_use]
    pub const fn is_replayable(&self) -> bool {
        matches!(self, Self::Empty | Self::Buffered(_) | Self::Structured(_))
    }

    /// Duplicates a replayable entity.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Buffered(bytes) => Some(Self::Buffered(bytes.clone())),
            Self::Structured(value) => Some(Self::Structured(value.clone())),
            Self::Streaming(_) | Self::Stream(_) => None,
        }
    }

    /// Returns the length when it is known without encoding.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Buffered(bytes) => Some(bytes.len() as u64),
            _ => None,
        }
    }

    /// Turns the entity into an HTTP body.
    ///
    /// Structured entities are encoded with the codec for `content_type`; the
    /// returned media type is the one to announce when the caller has not set
    /// a `Content-Type`. Streaming producers are spawned on the current Tokio
    /// runtime and may run at most `buffer` chunks ahead of the consumer.
    pub fn into_body(
        self,
        media: &MediaSupport,
        content_type: Option<&Mime>,
        buffer: usize,
    ) -> ConduitResult<(EntityBody, Option<Mime>)> {
        match self {
            Self::Empty => Ok((EntityBody::empty(), None)),
            Self::Buffered(bytes) => Ok((EntityBody::full(bytes), None)),
            Self::Structured(value) => {
                let (bytes, mime) = media.encode_value(&value, content_type)?;
                Ok((EntityBody::full(bytes), Some(mime)))
            }
            Self::Streaming(producer) => Ok((EntityBody::producer(producer, buffer), None)),
            Self::Stream(stream) => Ok((EntityBody::stream(stream), None)),
        }
    }
}

impl std::fmt::Debug for OutboundEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Structured(value) => f.debug_tuple("Structured").field(value).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for OutboundEntity {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl From<String> for OutboundEntity {
    fn from(text: String) -> Self {
        Self::Buffered(Bytes::from(text))
    }
}

impl From<&'static str> for OutboundEntity {
    fn from(text: &'static str) -> Self {
        Self::Buffered(Bytes::from_static(text.as_bytes()))
    }
}

impl From<Vec<u8>> for OutboundEntity {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffered(Bytes::from(bytes))
    }
}

impl From<serde_json::Value> for OutboundEntity {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Handle through which a streaming producer writes chunks.
///
/// Each `write` waits while the bounded buffer is full, so a producer can
/// never run further ahead of the consumer than the configured buffer.
#[derive(Debug)]
pub struct EntityWriter {
    tx: mpsc::Sender<Result<Bytes, BoxError>>,
}

impl EntityWriter {
    pub(crate) fn channel(buffer: usize) -> (Self, mpsc::Receiver<Result<Bytes, BoxError>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Writes a chunk, waiting for buffer space.
    ///
    /// Fails with [`ConduitError::StreamClosed`] when the consumer went away.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> ConduitResult<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| ConduitError::StreamClosed)
    }

    /// Writes one value as a newline-terminated JSON line.
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> ConduitResult<()> {
        let mut line = serde_json::to_vec(value).map_err(|e| {
            ConduitError::entity_conversion_with_source("cannot encode stream item", e)
        })?;
        line.push(b'\n');
        self.write(line).await
    }

    /// Returns `true` once the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum BodyKind {
    Empty,
    Full(Option<Bytes>),
    Channel {
        rx: mpsc::Receiver<Result<Bytes, BoxError>>,
        _producer: AbortOnDrop,
    },
    Stream(ByteStream),
}

/// HTTP body for outbound entities.
///
/// Dropping the body aborts a running streaming producer.
pub struct EntityBody {
    kind: BodyKind,
}

impl EntityBody {
    /// Creates an empty body.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    /// Creates a body with a known length.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            kind: BodyKind::Full(Some(bytes)),
        }
    }

    /// Creates a chunked body pulling from `stream`.
    #[must_use]
    pub fn stream(stream: ByteStream) -> Self {
        Self {
            kind: BodyKind::Stream(stream),
        }
    }

    fn producer(producer: Producer, buffer: usize) -> Self {
        let (writer, rx) = EntityWriter::channel(buffer);
        let errors = writer.tx.clone();
        let task = tokio::spawn(async move {
            match producer(writer).await {
                Ok(()) | Err(ConduitError::StreamClosed) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "entity producer failed");
                    let _ = errors.send(Err(Box::new(e))).await;
                }
            }
        });
        Self {
            kind: BodyKind::Channel {
                rx,
                _producer: AbortOnDrop(task),
            },
        }
    }
}

impl Default for EntityBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for EntityBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "empty",
            BodyKind::Full(_) => "full",
            BodyKind::Channel { .. } => "channel",
            BodyKind::Stream(_) => "stream",
        };
        f.debug_struct("EntityBody").field("kind", &kind).finish()
    }
}

impl Body for EntityBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            BodyKind::Empty => Poll::Ready(None),
            BodyKind::Full(bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            BodyKind::Channel { rx, .. } => rx
                .poll_recv(cx)
                .map(|item| item.map(|chunk| chunk.map(Frame::data))),
            BodyKind::Stream(stream) => stream
                .poll_next_unpin(cx)
                .map(|item| item.map(|chunk| chunk.map(Frame::data))),
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, BodyKind::Empty | BodyKind::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            BodyKind::Empty | BodyKind::Full(None) => SizeHint::with_exact(0),
            BodyKind::Full(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            BodyKind::Channel { .. } | BodyKind::Stream(_) => SizeHint::default(),
        }
    }
}
