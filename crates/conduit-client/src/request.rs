//! The request seen by client services.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::uri::{Authority, PathAndQuery};
use http::{HeaderMap, Method, Uri};
use tracing::trace;

use conduit_core::{ConduitError, ConduitResult, OutboundEntity, QueryParams, RequestId};
use conduit_pool::{ConnectionKey, Scheme};

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Built but not yet sent.
    Built = 0,
    /// Passing through the service chain towards the transport.
    ChainTraversal = 1,
    /// The transport is exchanging the request on a connection.
    TransportCall = 2,
    /// The response is travelling back through the service chain.
    ResponseTraversal = 3,
    /// The response reached the caller.
    Complete = 4,
    /// The request ended with an error.
    Failed = 5,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Built,
            1 => Self::ChainTraversal,
            2 => Self::TransportCall,
            3 => Self::ResponseTraversal,
            4 => Self::Complete,
            _ => Self::Failed,
        }
    }

    /// Returns the phase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::ChainTraversal => "chain_traversal",
            Self::TransportCall => "transport_call",
            Self::ResponseTraversal => "response_traversal",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a request, shared between the request, its snapshot and the client.
#[derive(Debug, Clone)]
pub(crate) struct PhaseTracker {
    id: RequestId,
    phase: Arc<AtomicU8>,
}

impl PhaseTracker {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            phase: Arc::new(AtomicU8::new(Phase::Built as u8)),
        }
    }

    pub(crate) fn get(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn advance(&self, next: Phase) {
        let previous = Phase::from_u8(self.phase.swap(next as u8, Ordering::AcqRel));
        if previous != next {
            trace!(request_id = %self.id, from = %previous, to = %next, "Request phase changed");
        }
    }
}

/// An outbound request as it travels through the service chain.
///
/// Services may change anything on it before calling
/// [`Chain::proceed`](crate::Chain::proceed). Once the transport takes the
/// request it is frozen into a [`RequestSnapshot`]. Setters return `&mut Self`
/// so they can be chained:
///
/// ```
/// use conduit_client::ServiceRequest;
/// use http::Method;
///
/// let mut request = ServiceRequest::new(Method::GET, "http://localhost:8080/orders".parse().unwrap()).unwrap();
/// request
///     .set_path("/orders/7")
///     .add_query("expand", "lines")
///     .set_property("tenant", "acme");
/// assert_eq!(request.uri().unwrap().to_string(), "http://localhost:8080/orders/7?expand=lines");
/// ```
pub struct ServiceRequest {
    id: RequestId,
    method: Method,
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: QueryParams,
    raw_query: Option<String>,
    fragment: Option<String>,
    headers: HeaderMap,
    properties: BTreeMap<String, String>,
    timeout: Option<Duration>,
    entity: OutboundEntity,
    phase: PhaseTracker,
}

impl ServiceRequest {
    /// Creates a request for an absolute `http` or `https` URI.
    pub fn new(method: Method, uri: Uri) -> ConduitResult<Self> {
        let scheme = uri
            .scheme_str()
            .and_then(Scheme::parse)
            .ok_or_else(|| ConduitError::invalid_request(format!("unsupported URI {uri}")))?;
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConduitError::invalid_request(format!("URI {uri} has no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        let path = match uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        let query = uri
            .query()
            .map(QueryParams::parse)
            .transpose()?
            .unwrap_or_default();
        let raw_query = uri.query().filter(|q| !q.is_empty()).map(str::to_string);

        let id = RequestId::next();
        Ok(Self {
            id,
            method,
            scheme,
            host,
            port,
            path,
            query,
            raw_query,
            fragment: None,
            headers: HeaderMap::new(),
            properties: BTreeMap::new(),
            timeout: None,
            entity: OutboundEntity::Empty,
            phase: PhaseTracker::new(id),
        })
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn phase_tracker(&self) -> &PhaseTracker {
        &self.phase
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Sets the method.
    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Returns the scheme.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Sets the scheme without touching the port.
    pub fn set_scheme(&mut self, scheme: Scheme) -> &mut Self {
        self.scheme = scheme;
        self
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Sets the host.
    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = host.into();
        self
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sets the port.
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sets the path; a missing leading `/` is added.
    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Returns the query parameters.
    #[must_use]
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Returns the query parameters mutably.
    ///
    /// The query is sent exactly as it appeared in the URI until it is
    /// changed; afterwards it is re-encoded from the parameters.
    pub fn query_mut(&mut self) -> &mut QueryParams {
        self.raw_query = None;
        &mut self.query
    }

    /// Appends a query parameter value.
    pub fn add_query(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query_mut().add(name, value);
        self
    }

    /// Returns the fragment.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Sets the fragment. It is kept for services and never sent.
    pub fn set_fragment(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers mutably.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Replaces all values of a header.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a value to a header.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// Removes every value of a header.
    pub fn remove_header(&mut self, name: &HeaderName) -> &mut Self {
        self.headers.remove(name);
        self
    }

    /// Returns a property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Sets a property; the last write wins.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Removes a property.
    pub fn remove_property(&mut self, key: &str) -> &mut Self {
        self.properties.remove(key);
        self
    }

    /// Returns the time budget of the whole request.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets the time budget of the whole request.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Returns the outbound entity.
    #[must_use]
    pub fn entity(&self) -> &OutboundEntity {
        &self.entity
    }

    /// Replaces the outbound entity.
    pub fn set_entity(&mut self, entity: impl Into<OutboundEntity>) -> &mut Self {
        self.entity = entity.into();
        self
    }

    /// Returns `host:port`, with the port left out when it is the scheme default.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    fn path_and_query(&self) -> ConduitResult<PathAndQuery> {
        let value = match &self.raw_query {
            Some(raw) => format!("{}?{raw}", self.path),
            None if self.query.is_empty() => self.path.clone(),
            None => format!("{}?{}", self.path, self.query.encode()),
        };
        PathAndQuery::try_from(value)
            .map_err(|e| ConduitError::invalid_request(format!("invalid path: {e}")))
    }

    /// Builds the absolute URI from the current parts. The fragment is not included.
    pub fn uri(&self) -> ConduitResult<Uri> {
        let authority = Authority::try_from(self.authority())
            .map_err(|e| ConduitError::invalid_request(format!("invalid authority: {e}")))?;
        Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(authority)
            .path_and_query(self.path_and_query()?)
            .build()
            .map_err(|e| ConduitError::invalid_request(format!("invalid URI: {e}")))
    }

    /// Returns the pool key of the target endpoint.
    pub(crate) fn connection_key(&self, tls_identity: Option<u64>) -> ConnectionKey {
        let key = ConnectionKey::new(self.scheme, self.host.clone(), self.port);
        match tls_identity {
            Some(identity) if self.scheme.is_tls() => key.with_tls_identity(identity),
            _ => key,
        }
    }

    /// Duplicates the request when its entity can be sent again.
    ///
    /// The copy keeps the id and phase so retries correlate with the original.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            id: self.id,
            method: self.method.clone(),
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            query: self.query.clone(),
            raw_query: self.raw_query.clone(),
            fragment: self.fragment.clone(),
            headers: self.headers.clone(),
            properties: self.properties.clone(),
            timeout: self.timeout,
            entity: self.entity.try_clone()?,
            phase: self.phase.clone(),
        })
    }

    /// Captures the current state without consuming the request.
    pub fn snapshot(&self) -> ConduitResult<Arc<RequestSnapshot>> {
        Ok(Arc::new(RequestSnapshot {
            id: self.id,
            method: self.method.clone(),
            uri: self.uri()?,
            headers: self.headers.clone(),
            properties: self.properties.clone(),
            fragment: self.fragment.clone(),
            phase: self.phase.clone(),
        }))
    }

    /// Freezes the request for the transport, returning the request line
    /// target and the entity.
    pub(crate) fn freeze(self) -> ConduitResult<(Arc<RequestSnapshot>, PathAndQuery, OutboundEntity)> {
        let target = self.path_and_query()?;
        let uri = self.uri()?;
        let snapshot = Arc::new(RequestSnapshot {
            id: self.id,
            method: self.method,
            uri,
            headers: self.headers,
            properties: self.properties,
            fragment: self.fragment,
            phase: self.phase,
        });
        Ok((snapshot, target, self.entity))
    }
}

impl fmt::Debug for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("scheme", &self.scheme)
            .field("authority", &self.authority())
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("properties", &self.properties)
            .field("entity", &self.entity)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// The frozen view of a request after it reached the transport.
#[derive(Debug)]
pub struct RequestSnapshot {
    id: RequestId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    properties: BTreeMap<String, String>,
    fragment: Option<String>,
    phase: PhaseTracker,
}

impl RequestSnapshot {
    /// Returns the correlation id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute URI that was requested.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the headers as sent by the chain.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Returns the fragment.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Returns the current phase of the request.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }
}
