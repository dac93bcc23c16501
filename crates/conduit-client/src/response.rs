//! The response seen by client services.

use std::sync::Arc;

use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use serde::de::DeserializeOwned;

use conduit_core::{ConduitError, ConduitResult, MediaSupport, ReadableEntity};
use conduit_pool::{ConnectionId, ConnectionKey};

use crate::request::RequestSnapshot;

/// The pooled connection a response arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Identity of the connection.
    pub id: ConnectionId,
    /// Whether the connection had served an earlier request.
    pub reused: bool,
    /// Pool key of the connection.
    pub key: ConnectionKey,
}

/// A response travelling back through the service chain.
///
/// Headers are fixed once received. The entity is read lazily and only once.
pub struct ServiceResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    entity: ReadableEntity,
    request: Arc<RequestSnapshot>,
    connection: Option<ConnectionInfo>,
}

impl ServiceResponse {
    /// Creates a response without an entity, for services that answer
    /// without calling the transport.
    pub fn new(status: StatusCode, request: Arc<RequestSnapshot>) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            entity: ReadableEntity::empty(MediaSupport::default()),
            request,
            connection: None,
        }
    }

    pub(crate) fn from_transport(
        parts: http::response::Parts,
        entity: ReadableEntity,
        request: Arc<RequestSnapshot>,
        connection: ConnectionInfo,
    ) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            entity,
            request,
            connection: Some(connection),
        }
    }

    /// Adds a header. Only usable while building a short-circuit response.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the entity. Only usable while building a short-circuit response.
    #[must_use]
    pub fn with_entity(mut self, entity: ReadableEntity) -> Self {
        self.entity = entity;
        self
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the canonical reason phrase of the status.
    #[must_use]
    pub fn reason(&self) -> Option<&'static str> {
        self.status.canonical_reason()
    }

    /// Returns the HTTP version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of a header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the request this response answers.
    #[must_use]
    pub fn request(&self) -> &Arc<RequestSnapshot> {
        &self.request
    }

    /// Returns the connection the response arrived on; `None` for
    /// short-circuit responses.
    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.connection.as_ref()
    }

    /// Returns the entity.
    pub fn entity(&mut self) -> &mut ReadableEntity {
        &mut self.entity
    }

    /// Takes the entity, dropping the rest of the response.
    #[must_use]
    pub fn into_entity(self) -> ReadableEntity {
        self.entity
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

    /// Reads the entity with the codec matching its content type.
    pub async fn decode<T: DeserializeOwned>(&mut self) -> ConduitResult<T> {
        self.entity.decode().await
    }

    /// Fails with [`ConduitError::Status`] for 4xx and 5xx responses.
    ///
    /// The entity is dropped on failure, which closes its connection.
    pub fn error_for_status(self) -> ConduitResult<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(ConduitError::Status {
                method: self.request.method().clone(),
                uri: self.request.uri().to_string(),
                status: self.status,
            });
        }
        Ok(self)
    }
}

impl std::fmt::Debug for ServiceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("request", &self.request.id())
            .field("connection", &self.connection)
            .field("entity", &self.entity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceRequest;
    use conduit_core::ErrorKind;
    use http::Method;

    fn snapshot() -> Arc<RequestSnapshot> {
        ServiceRequest::new(Method::GET, "http://h/x".parse().unwrap())
            .unwrap()
            .snapshot()
            .unwrap()
    }

    #[tokio::test]
    async fn test_short_circuit_response_entity_reads_once() {
        let entity = ReadableEntity::new(
            http_body_util::Full::new(Bytes::from_static(b"cached")),
            Some(mime::TEXT_PLAIN),
            MediaSupport::default(),
        );
        let mut response = ServiceResponse::new(StatusCode::OK, snapshot())
            .with_header(
                HeaderName::from_static("x-cache"),
                HeaderValue::from_static("hit"),
            )
            .with_entity(entity);

        assert_eq!(response.header("x-cache"), Some("hit"));
        assert_eq!(response.reason(), Some("OK"));
        assert!(response.connection().is_none());
        assert_eq!(response.text().await.unwrap(), "cached");
        assert!(matches!(
            response.bytes().await.unwrap_err(),
            ConduitError::EntityConsumed
        ));
    }

    #[test]
    fn test_error_for_status() {
        let ok = ServiceResponse::new(StatusCode::NO_CONTENT, snapshot());
        assert!(ok.error_for_status().is_ok());

        let err = ServiceResponse::new(StatusCode::BAD_GATEWAY, snapshot())
            .error_for_status()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status);
        assert!(err.to_string().contains("502"));
    }
}
