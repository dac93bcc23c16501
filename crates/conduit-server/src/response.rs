//! The response a handler produces.

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;

use conduit_core::{ConduitError, ConduitResult, EntityWriter, OutboundEntity};

/// A response under construction.
///
/// ```rust
/// use conduit_server::ServerResponse;
/// use http::StatusCode;
///
/// let response = ServerResponse::new(StatusCode::CREATED)
///     .header("location", "/orders/7")
///     .body("created");
/// assert_eq!(response.status(), StatusCode::CREATED);
/// ```
#[derive(Debug)]
pub struct ServerResponse {
    status: StatusCode,
    headers: HeaderMap,
    entity: OutboundEntity,
    error: Option<ConduitError>,
}

impl ServerResponse {
    /// Creates an empty response with `status`.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            entity: OutboundEntity::Empty,
            error: None,
        }
    }

    /// Creates an empty `200 OK` response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Creates a JSON error body of the form `{"error": {"code", "message"}}`.
    ///
    /// The body is serialized up front so it can be written whatever codecs
    /// the server has.
    #[must_use]
    pub fn error(status: StatusCode, code: &str, message: &str) -> Self {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        let mut response = Self::new(status).body(body.to_string());
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Adds a header value. Invalid names or values fail the response when
    /// it is written.
    #[must_use]
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(name).map_err(Into::<http::Error>::into);
        let value = HeaderValue::try_from(value).map_err(Into::<http::Error>::into);
        match name.and_then(|name| value.map(|value| (name, value))) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => {
                self.error
                    .get_or_insert_with(|| ConduitError::invalid_request(format!("invalid header: {e}")));
            }
        }
        self
    }

    /// Sets the entity.
    #[must_use]
    pub fn body(mut self, entity: impl Into<OutboundEntity>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Sets a structured entity, encoded by the codec for the response's
    /// `Content-Type` (JSON when unset).
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match OutboundEntity::json(value) {
            Ok(entity) => self.entity = entity,
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Streams the entity from `producer`, chunked.
    #[must_use]
    pub fn streaming<F, Fut>(mut self, producer: F) -> Self
    where
        F: FnOnce(EntityWriter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ConduitResult<()>> + Send + 'static,
    {
        self.entity = OutboundEntity::streaming(producer);
        self
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the declared content type.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Returns the entity.
    #[must_use]
    pub fn entity(&self) -> &OutboundEntity {
        &self.entity
    }

    pub(crate) fn into_parts(self) -> ConduitResult<(StatusCode, HeaderMap, OutboundEntity)> {
        match self.error {
            Some(e) => Err(e),
            None => Ok((self.status, self.headers, self.entity)),
        }
    }
}

impl Default for ServerResponse {
    fn default() -> Self {
        Self::ok()
    }
}
