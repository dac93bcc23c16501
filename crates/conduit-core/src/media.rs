//! Media codecs.
//!
//! Codecs translate between wire bytes and structured values. They are
//! registered explicitly in a [`MediaSupport`] value that is handed to the
//! client and server builders; there is no global codec registry.
//!
//! Codecs work on [`serde_json::Value`] as the intermediate representation,
//! so any `serde` type can be read or written through any registered codec.

use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use mime::Mime;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ConduitError, ConduitResult};

/// Media type used for newline-delimited JSON item streams.
pub const APPLICATION_NDJSON: &str = "application/x-ndjson";

/// A codec for one family of media types.
pub trait MediaCodec: Send + Sync + 'static {
    /// Returns a short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Returns the content type written for entities this codec encodes.
    fn content_type(&self) -> Mime;

    /// Returns `true` if this codec can read `media_type`.
    fn accepts(&self, media_type: &Mime) -> bool;

    /// Decodes bytes into a structured value.
    fn decode(&self, bytes: &[u8]) -> ConduitResult<serde_json::Value>;

    /// Encodes a structured value into bytes.
    fn encode(&self, value: &serde_json::Value) -> ConduitResult<Bytes>;
}

/// JSON codec for `application/json`, `*/*+json` and NDJSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MediaCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> Mime {
        mime::APPLICATION_JSON
    }

    fn accepts(&self, media_type: &Mime) -> bool {
        media_type.subtype() == mime::JSON
            || media_type.suffix() == Some(mime::JSON)
            || media_type.essence_str() == APPLICATION_NDJSON
    }

    fn decode(&self, bytes: &[u8]) -> ConduitResult<serde_json::Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| ConduitError::entity_conversion_with_source("invalid JSON entity", e))
    }

    fn encode(&self, value: &serde_json::Value) -> ConduitResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| ConduitError::entity_conversion_with_source("cannot encode JSON", e))
    }
}

/// Plain text codec; reads and writes JSON strings only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl MediaCodec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn content_type(&self) -> Mime {
        mime::TEXT_PLAIN_UTF_8
    }

    fn accepts(&self, media_type: &Mime) -> bool {
        media_type.type_() == mime::TEXT && media_type.subtype() == mime::PLAIN
    }

    fn decode(&self, bytes: &[u8]) -> ConduitResult<serde_json::Value> {
        std::str::from_utf8(bytes)
            .map(|s| serde_json::Value::String(s.to_string()))
            .map_err(|e| ConduitError::entity_conversion_with_source("text entity is not UTF-8", e))
    }

    fn encode(&self, value: &serde_json::Value) -> ConduitResult<Bytes> {
        match value {
            serde_json::Value::String(s) => Ok(Bytes::from(s.clone())),
            other => Err(ConduitError::entity_conversion(format!(
                "text codec can only write strings, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// The set of codecs available to a client or server.
///
/// Lookup is by registration order: the first codec that accepts a media
/// type wins. When an entity carries no content type, the first registered
/// codec is used.
///
/// # Example
///
/// ```
/// use conduit_core::MediaSupport;
///
/// let media = MediaSupport::default();
/// let (bytes, content_type) = media.encode(&vec![1, 2, 3], None).unwrap();
/// assert_eq!(&bytes[..], b"[1,2,3]");
/// assert_eq!(content_type, mime::APPLICATION_JSON);
///
/// let back: Vec<u32> = media.decode(Some(&content_type), &bytes).unwrap();
/// assert_eq!(back, vec![1, 2, 3]);
/// ```
#[derive(Clone)]
pub struct MediaSupport {
    codecs: Vec<Arc<dyn MediaCodec>>,
}

impl MediaSupport {
    /// Creates a media support without any codec.
    #[must_use]
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Registers a codec ahead of the already registered ones.
    #[must_use]
    pub fn with_codec(mut self, codec: impl MediaCodec) -> Self {
        self.codecs.insert(0, Arc::new(codec));
        self
    }

    /// Returns the names of the registered codecs in lookup order.
    #[must_use]
    pub fn codec_names(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|c| c.name()).collect()
    }

    /// Finds the codec for `media_type`.
    pub fn codec_for(&self, media_type: Option<&Mime>) -> ConduitResult<&dyn MediaCodec> {
        let codec = match media_type {
            Some(mt) => self.codecs.iter().find(|c| c.accepts(mt)),
            None => self.codecs.first(),
        };
        codec.map(AsRef::as_ref).ok_or_else(|| {
            ConduitError::entity_conversion(match media_type {
                Some(mt) => format!("no codec registered for media type {mt}"),
                None => "no codec registered".to_string(),
            })
        })
    }

    /// Decodes `bytes` of the given media type into `T`.
    pub fn decode<T: DeserializeOwned>(
        &self,
        media_type: Option<&Mime>,
        bytes: &[u8],
    ) -> ConduitResult<T> {
        let value = self.codec_for(media_type)?.decode(bytes)?;
        from_value(value)
    }

    /// Encodes `value`, returning the bytes and the content type to send.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
        media_type: Option<&Mime>,
    ) -> ConduitResult<(Bytes, Mime)> {
        let value = serde_json::to_value(value).map_err(|e| {
            ConduitError::entity_conversion_with_source("cannot convert value for encoding", e)
        })?;
        self.encode_value(&value, media_type)
    }

    /// Encodes an already structured value.
    pub fn encode_value(
        &self,
        value: &serde_json::Value,
        media_type: Option<&Mime>,
    ) -> ConduitResult<(Bytes, Mime)> {
        let codec = self.codec_for(media_type)?;
        let bytes = codec.encode(value)?;
        let content_type = media_type.cloned().unwrap_or_else(|| codec.content_type());
        Ok((bytes, content_type))
    }
}

impl Default for MediaSupport {
    fn default() -> Self {
        Self {
            codecs: vec![Arc::new(JsonCodec), Arc::new(TextCodec)],
        }
    }
}

impl std::fmt::Debug for MediaSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSupport")
            .field("codecs", &self.codec_names())
            .finish()
    }
}

/// Converts an intermediate value into `T`.
pub(crate) fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> ConduitResult<T> {
    serde_json::from_value(value).map_err(|e| {
        ConduitError::entity_conversion_with_source("entity does not match the requested type", e)
    })
}

/// Parses the `Content-Type` header, ignoring values that are not valid media types.
#[must_use]
pub fn content_type(headers: &HeaderMap) -> Option<Mime> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Greeting {
        message: String,
    }

    #[test]
    fn test_json_accepts_suffix_and_ndjson() {
        let codec = JsonCodec;
        assert!(codec.accepts(&mime::APPLICATION_JSON));
        assert!(codec.accepts(&"application/problem+json".parse().unwrap()));
        assert!(codec.accepts(&APPLICATION_NDJSON.parse().unwrap()));
        assert!(!codec.accepts(&mime::TEXT_PLAIN));
    }

    #[test]
    fn test_decode_by_content_type() {
        let media = MediaSupport::default();
        let greeting: Greeting = media
            .decode(Some(&mime::APPLICATION_JSON), br#"{"message":"hi"}"#)
            .unwrap();
        assert_eq!(greeting.message, "hi");

        let text: String = media.decode(Some(&mime::TEXT_PLAIN_UTF_8), b"plain").unwrap();
        assert_eq!(text, "plain");
    }

    #[test]
    fn test_unknown_media_type_is_conversion_error() {
        let media = MediaSupport::default();
        let err = media
            .decode::<Greeting>(Some(&mime::APPLICATION_OCTET_STREAM), b"\x00")
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EntityConversion);
        assert!(err.to_string().contains("no codec"));
    }

    #[test]
    fn test_shape_mismatch_is_conversion_error() {
        let media = MediaSupport::default();
        let err = media
            .decode::<Greeting>(None, br#"{"other":1}"#)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EntityConversion);
    }

    #[test]
    fn test_text_codec_rejects_objects() {
        let media = MediaSupport::default();
        let err = media
            .encode(&Greeting { message: "x".into() }, Some(&mime::TEXT_PLAIN))
            .unwrap_err();
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn test_registered_codec_takes_precedence() {
        struct Upper;
        impl MediaCodec for Upper {
            fn name(&self) -> &'static str {
                "upper"
            }
            fn content_type(&self) -> Mime {
                mime::TEXT_PLAIN
            }
            fn accepts(&self, media_type: &Mime) -> bool {
                media_type.type_() == mime::TEXT
            }
            fn decode(&self, bytes: &[u8]) -> ConduitResult<serde_json::Value> {
                Ok(serde_json::Value::String(
                    String::from_utf8_lossy(bytes).to_uppercase(),
                ))
            }
            fn encode(&self, value: &serde_json::Value) -> ConduitResult<Bytes> {
                Ok(Bytes::from(value.to_string()))
            }
        }

        let media = MediaSupport::default().with_codec(Upper);
        assert_eq!(media.codec_names(), vec!["upper", "json", "text"]);
        let text: String = media.decode(Some(&mime::TEXT_PLAIN), b"abc").unwrap();
        assert_eq!(text, "ABC");
    }

    #[test]
    fn test_empty_support_fails() {
        let media = MediaSupport::empty();
        assert!(media.codec_for(None).is_err());
    }
}
