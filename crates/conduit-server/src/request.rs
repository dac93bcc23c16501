//! The request a handler receives.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use mime::Mime;
use serde::de::DeserializeOwned;

use conduit_core::{ConduitResult, QueryParams, ReadableEntity, RequestId};

/// An inbound request with its path parameters and unread entity.
#[derive(Debug)]
pub struct ServerRequest {
    id: RequestId,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    query: QueryParams,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
    entity: ReadableEntity,
}

impl ServerRequest {
    /// Creates a request. Fails when the query string is malformed.
    pub fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        entity: ReadableEntity,
    ) -> ConduitResult<Self> {
        let query = uri.query().map(QueryParams::parse).transpose()?.unwrap_or_default();
        Ok(Self {
            id: RequestId::next(),
            method,
            uri,
            version,
            headers,
            query,
            params: HashMap::new(),
            remote_addr: None,
            entity,
        })
    }

    pub(crate) fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Returns the server-side request id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the protocol version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of a header as text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the query parameters.
    #[must_use]
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Returns a path parameter captured by the matched route. The trailing
    /// wildcard is available as `*`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns all captured path parameters.
    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns the peer address when served from a socket.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns the declared content type of the entity.
    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.entity.content_type()
    }

    /// Returns the entity for streaming reads.
    pub fn entity(&mut self) -> &mut ReadableEntity {
        &mut self.entity
    }

    /// Reads the whole entity.
    pub async fn bytes(&mut self) -> ConduitResult<Bytes> {
        self.entity.bytes().await
    }

    /// Reads the entity as UTF-8 text.
    pub async fn text(&mut self) -> ConduitResult<String> {
        self.entity.text().await
    }

    /// Reads the entity as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> ConduitResult<T> {
        self.entity.json().await
    }

    /// Reads the entity with the codec for its content type.
    pub async fn decode<T: DeserializeOwned>(&mut self) -> ConduitResult<T> {
        self.entity.decode().await
    }
}
