//! Inbound entities.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use http_body::Body;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use mime::Mime;
use serde::de::DeserializeOwned;

use super::items::ItemStream;
use crate::error::{BoxError, ConduitError, ConduitResult};
use crate::media::MediaSupport;

/// Default upper bound for a single item read through [`ReadableEntity::items`].
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Raw chunks of an inbound entity.
pub type ChunkStream = BoxStream<'static, ConduitResult<Bytes>>;

type InboundBody = UnsyncBoxBody<Bytes, BoxError>;

/// An inbound entity that can be consumed exactly once.
///
/// Every reading method takes the underlying body; a second call fails with
/// [`ConduitError::EntityConsumed`].
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use conduit_core::{ConduitError, MediaSupport, ReadableEntity};
/// use http_body_util::Full;
/// use bytes::Bytes;
///
/// let mut entity = ReadableEntity::new(
///     Full::new(Bytes::from_static(b"[1,2]")),
///     Some(mime::APPLICATION_JSON),
///     MediaSupport::default(),
/// );
/// let numbers: Vec<u8> = entity.decode().await.unwrap();
/// assert_eq!(numbers, vec![1, 2]);
///
/// let again = entity.bytes().await.unwrap_err();
/// assert!(matches!(again, ConduitError::EntityConsumed));
/// # });
/// ```
pub struct ReadableEntity {
    body: Option<InboundBody>,
    content_type: Option<Mime>,
    media: MediaSupport,
    read_timeout: Option<Duration>,
    max_item_size: usize,
}

impl ReadableEntity {
    /// Wraps an HTTP body.
    pub fn new<B>(body: B, content_type: Option<Mime>, media: MediaSupport) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            body: Some(body.map_err(Into::into).boxed_unsync()),
            content_type,
            media,
            read_timeout: None,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
        }
    }

    /// Creates an entity without content.
    #[must_use]
    pub fn empty(media: MediaSupport) -> Self {
        Self::new(Empty::<Bytes>::new(), None, media)
    }

    /// Fails any single frame read that takes longer than `timeout`.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the largest item accepted by [`items`](Self::items).
    #[must_use]
    pub fn with_max_item_size(mut self, max: usize) -> Self {
        self.max_item_size = max;
        self
    }

    /// Returns the parsed `Content-Type` of the entity.
    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// Returns the codecs used by [`decode`](Self::decode).
    #[must_use]
    pub fn media(&self) -> &MediaSupport {
        &self.media
    }

    /// Returns `true` once a reading method has taken the body.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.body.is_none()
    }

    /// Returns `true` if the body is known to be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.as_ref().is_some_and(|body| body.is_end_stream())
    }

    fn take(&mut self) -> ConduitResult<InboundBody> {
        self.body.take().ok_or(ConduitError::EntityConsumed)
    }

    /// Reads the whole entity.
    pub async fn bytes(&mut self) -> ConduitResult<Bytes> {
        let mut body = self.take()?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = next_chunk(&mut body, self.read_timeout).await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Reads the whole entity as UTF-8 text.
    pub async fn text(&mut self) -> ConduitResult<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ConduitError::entity_conversion_with_source("entity is not UTF-8", e))
    }

    /// Reads the whole entity as JSON, regardless of its content type.
    pub async fn json<T: DeserializeOwned>(&mut self) -> ConduitResult<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ConduitError::entity_conversion_with_source("invalid JSON entity", e))
    }

    /// Reads the whole entity with the codec matching its content type.
    pub async fn decode<T: DeserializeOwned>(&mut self) -> ConduitResult<T> {
        let bytes = self.bytes().await?;
        self.media.decode(self.content_type.as_ref(), &bytes)
    }

    /// Reads the entity to its end and drops the content.
    pub async fn discard(&mut self) -> ConduitResult<()> {
        let mut body = self.take()?;
        while next_chunk(&mut body, self.read_timeout).await?.is_some() {}
        Ok(())
    }

    /// Returns the raw chunks as they arrive.
    pub fn chunks(&mut self) -> ConduitResult<ChunkStream> {
        let body = self.take()?;
        let read_timeout = self.read_timeout;
        Ok(Box::pin(stream::try_unfold(body, move |mut body| async move {
            let chunk = next_chunk(&mut body, read_timeout).await?;
            Ok::<_, ConduitError>(chunk.map(|chunk| (chunk, body)))
        })))
    }

    /// Returns the structured items of an NDJSON stream or a top-level JSON
    /// array, parsed as their bytes arrive.
    pub fn items<T: DeserializeOwned>(&mut self) -> ConduitResult<ItemStream<T>> {
        let ndjson = self
            .content_type
            .as_ref()
            .is_some_and(|mt| mt.essence_str() == crate::media::APPLICATION_NDJSON);
        let chunks = self.chunks()?;
        Ok(ItemStream::new(chunks, ndjson, self.max_item_size))
    }
}

impl std::fmt::Debug for ReadableEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadableEntity")
            .field("content_type", &self.content_type)
            .field("consumed", &self.is_consumed())
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

async fn next_chunk(
    body: &mut InboundBody,
    read_timeout: Option<Duration>,
) -> ConduitResult<Option<Bytes>> {
    loop {
        let frame = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, body.frame())
                .await
                .map_err(|_| ConduitError::timeout("read", limit))?,
            None => body.frame().await,
        };
        match frame {
            None => return Ok(None),
            Some(Err(e)) => return Err(body_error(e)),
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    if !data.is_empty() {
                        return Ok(Some(data));
                    }
                }
            }
        }
    }
}

fn body_error(error: BoxError) -> ConduitError {
    match error.downcast::<ConduitError>() {
        Ok(conduit) => *conduit,
        Err(other) => ConduitError::protocol_with_source("failed to read entity", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use http_body_util::{Full, StreamBody};
    use http_body::Frame;
    use serde::Deserialize;

    fn full(bytes: &'static [u8], content_type: Option<Mime>) -> ReadableEntity {
        ReadableEntity::new(
            Full::new(Bytes::from_static(bytes)),
            content_type,
            MediaSupport::default(),
        )
    }

    fn chunked(chunks: Vec<&'static str>, content_type: Option<Mime>) -> ReadableEntity {
        let frames = chunks
            .into_iter()
            .map(|c| Ok::<_, BoxError>(Frame::data(Bytes::from_static(c.as_bytes()))));
        ReadableEntity::new(
            StreamBody::new(futures_util::stream::iter(frames)),
            content_type,
            MediaSupport::default(),
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    #[tokio::test]
    async fn test_second_read_is_consumed() {
        let mut entity = full(b"hello", None);
        assert_eq!(entity.text().await.unwrap(), "hello");
        assert!(entity.is_consumed());
        assert!(matches!(
            entity.text().await.unwrap_err(),
            ConduitError::EntityConsumed
        ));
        assert!(matches!(entity.chunks().err(), Some(ConduitError::EntityConsumed)));
    }

    #[tokio::test]
    async fn test_decode_uses_content_type() {
        let mut entity = full(b"plain words", Some(mime::TEXT_PLAIN));
        let text: String = entity.decode().await.unwrap();
        assert_eq!(text, "plain words");
    }

    #[tokio::test]
    async fn test_invalid_json_is_conversion_error() {
        let mut entity = full(b"{not json", Some(mime::APPLICATION_JSON));
        let err = entity.json::<serde_json::Value>().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EntityConversion);
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let mut entity = chunked(vec!["a", "", "b", "c"], None);
        let chunks: Vec<Bytes> = entity
            .chunks()
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
    }

    #[tokio::test]
    async fn test_items_from_ndjson() {
        let mut entity = chunked(
            vec!["{\"id\":1}\n{\"i", "d\":2}\n", "{\"id\":3}"],
            Some(crate::media::APPLICATION_NDJSON.parse().unwrap()),
        );
        let items: Vec<Item> = entity
            .items()
            .unwrap()
            .map(|i| i.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![Item { id: 1 }, Item { id: 2 }, Item { id: 3 }]);
    }

    #[tokio::test]
    async fn test_items_from_json_array() {
        let mut entity = chunked(
            vec!["[{\"id\":1},", " {\"id\"", ":2}]"],
            Some(mime::APPLICATION_JSON),
        );
        let items: Vec<Item> = entity
            .items()
            .unwrap()
            .map(|i| i.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![Item { id: 1 }, Item { id: 2 }]);
    }

    #[tokio::test]
    async fn test_body_error_surfaces_as_protocol_error() {
        let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![
            Ok(Frame::data(Bytes::from("partial"))),
            Err(Box::new(std::io::Error::other("reset"))),
        ];
        let mut entity = ReadableEntity::new(
            StreamBody::new(futures_util::stream::iter(frames)),
            None,
            MediaSupport::default(),
        );
        let err = entity.bytes().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_between_frames() {
        let frames = futures_util::stream::pending::<Result<Frame<Bytes>, BoxError>>();
        let mut entity = ReadableEntity::new(
            StreamBody::new(frames),
            None,
            MediaSupport::default(),
        )
        .with_read_timeout(Some(Duration::from_millis(100)));
        let err = entity.bytes().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_empty_entity() {
        let mut entity = ReadableEntity::empty(MediaSupport::default());
        assert!(entity.is_empty());
        assert!(entity.bytes().await.unwrap().is_empty());
    }
}
