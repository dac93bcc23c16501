//! The client facade.

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;
use tracing::{debug, info};

use conduit_config::ClientSettings;
use conduit_core::{
    ConduitError, ConduitResult, EntityWriter, MediaSupport, OutboundEntity, QueryParams,
};
use conduit_pool::PoolStats;

use crate::config::ClientConfig;
use crate::connection::HttpConnector;
use crate::request::{Phase, ServiceRequest};
use crate::response::ServiceResponse;
use crate::service::{Chain, WebClientService};
use crate::tls::TlsConfig;
use crate::transport::Transport;

struct ClientInner {
    base_uri: Option<Uri>,
    default_headers: HeaderMap,
    services: Vec<Arc<dyn WebClientService>>,
    transport: Transport,
    config: ClientConfig,
    media: MediaSupport,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}

/// A pooled HTTP/1.1 client with a service chain.
///
/// The client is immutable once built; per-request options go on the
/// [`ClientRequest`]. Cloning is cheap and shares the pool and services.
///
/// # Example
///
/// ```ignore
/// use conduit_client::{services::MetricsService, WebClient};
///
/// let client = WebClient::builder()
///     .base_uri("http://orders.internal:8080/api")
///     .service(MetricsService::new())
///     .build()?;
///
/// let mut response = client.get().path("orders/42").send().await?;
/// let order: Order = response.json().await?;
/// ```
#[derive(Clone)]
pub struct WebClient {
    inner: Arc<ClientInner>,
}

impl WebClient {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> WebClientBuilder {
        WebClientBuilder::new()
    }

    /// Starts a request with the given method.
    #[must_use]
    pub fn request(&self, method: Method) -> ClientRequest {
        ClientRequest::new(self.clone(), method)
    }

    /// Starts a `GET` request.
    #[must_use]
    pub fn get(&self) -> ClientRequest {
        self.request(Method::GET)
    }

    /// Starts a `POST` request.
    #[must_use]
    pub fn post(&self) -> ClientRequest {
        self.request(Method::POST)
    }

    /// Starts a `PUT` request.
    #[must_use]
    pub fn put(&self) -> ClientRequest {
        self.request(Method::PUT)
    }

    /// Starts a `PATCH` request.
    #[must_use]
    pub fn patch(&self) -> ClientRequest {
        self.request(Method::PATCH)
    }

    /// Starts a `DELETE` request.
    #[must_use]
    pub fn delete(&self) -> ClientRequest {
        self.request(Method::DELETE)
    }

    /// Starts a `HEAD` request.
    #[must_use]
    pub fn head(&self) -> ClientRequest {
        self.request(Method::HEAD)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the codecs used for entities.
    #[must_use]
    pub fn media(&self) -> &MediaSupport {
        &self.inner.media
    }

    /// Returns the base URI.
    #[must_use]
    pub fn base_uri(&self) -> Option<&Uri> {
        self.inner.base_uri.as_ref()
    }

    /// Returns the names of the services, outermost first.
    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        self.inner.services.iter().map(|s| s.name()).collect()
    }

    /// Returns a snapshot of the connection pool.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.transport.pool_stats()
    }

    /// Closes idle connections and stops pooling. Requests in progress finish
    /// on their connections, which are then closed.
    pub fn shutdown(&self) {
        self.inner.transport.shutdown();
    }

    /// Sends a prepared request through the service chain.
    ///
    /// The request timeout, when set, covers the whole exchange up to the
    /// response head. When it fires the connection is closed.
    pub async fn execute(&self, request: ServiceRequest) -> ConduitResult<ServiceResponse> {
        let phase = request.phase_tracker().clone();
        let id = request.id();
        let timeout = request.timeout();
        phase.advance(Phase::ChainTraversal);

        let exchange = Chain::new(&self.inner.services, &self.inner.transport).proceed(request);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or_else(|_| Err(ConduitError::timeout("request", limit))),
            None => exchange.await,
        };

        match &result {
            Ok(response) => {
                phase.advance(Phase::Complete);
                debug!(request_id = %id, status = response.status().as_u16(), "Request complete");
            }
            Err(e) => {
                phase.advance(Phase::Failed);
                debug!(request_id = %id, error = %e, "Request failed");
            }
        }
        result
    }

    fn resolve(&self, uri: Option<&str>) -> ConduitResult<Uri> {
        let base = self.inner.base_uri.as_ref();
        let Some(raw) = uri else {
            return base
                .cloned()
                .ok_or_else(|| ConduitError::invalid_request("no URI and no base URI configured"));
        };

        if raw.contains("://") {
            return raw
                .parse()
                .map_err(|e| ConduitError::invalid_request(format!("invalid URI '{raw}': {e}")));
        }

        let base = base.ok_or_else(|| {
            ConduitError::invalid_request(format!("relative URI '{raw}' without a base URI"))
        })?;
        let (path, query) = raw.split_once('?').map_or((raw, None), |(p, q)| (p, Some(q)));
        let mut joined = join_path(base.path(), path);
        if let Some(query) = merge_query(base.query(), query) {
            joined.push('?');
            joined.push_str(&query);
        }

        let mut parts = base.clone().into_parts();
        parts.path_and_query = Some(
            joined
                .parse()
                .map_err(|e| ConduitError::invalid_request(format!("invalid path '{raw}': {e}")))?,
        );
        Uri::from_parts(parts).map_err(|e| ConduitError::invalid_request(e.to_string()))
    }
}

impl std::fmt::Debug for WebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebClient")
            .field("base_uri", &self.inner.base_uri)
            .field("services", &self.service_names())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn join_path(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{base}/{relative}")
    }
}

fn merge_query(base: Option<&str>, extra: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), extra.filter(|q| !q.is_empty())) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

/// Builder for [`WebClient`].
pub struct WebClientBuilder {
    base_uri: Option<String>,
    tls: Option<TlsConfig>,
    config: ClientConfig,
    media: MediaSupport,
    default_headers: HeaderMap,
    services: Vec<Arc<dyn WebClientService>>,
    error: Option<ConduitError>,
}

impl Default for WebClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WebClientBuilder {
    /// Creates a builder with default options and no services.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_uri: None,
            tls: None,
            config: ClientConfig::default(),
            media: MediaSupport::default(),
            default_headers: HeaderMap::new(),
            services: Vec::new(),
            error: None,
        }
    }

    /// Creates a builder from loaded configuration.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let mut builder = Self::new().config(ClientConfig::from(settings));
        if let Some(base_uri) = &settings.base_uri {
            builder = builder.base_uri(base_uri.clone());
        }
        for (name, value) in &settings.default_headers {
            builder = builder.default_header(name.as_str(), value.as_str());
        }
        builder
    }

    /// Sets the URI relative request URIs resolve against.
    #[must_use]
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    /// Sets the TLS configuration for `https` requests.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Replaces all options.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout; `None` waits forever.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets how many idle connections are kept per key.
    #[must_use]
    pub fn max_idle_per_key(mut self, max: usize) -> Self {
        self.config.max_idle_per_key = max;
        self
    }

    /// Sets how long an idle connection is kept.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets how many connections may be leased at once per key.
    #[must_use]
    pub fn max_connections_per_key(mut self, max: usize) -> Self {
        self.config.max_connections_per_key = max;
        self
    }

    /// Sets how long a request waits for a free connection.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Enables or disables connection reuse.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Sets the codecs for structured entities.
    #[must_use]
    pub fn media(mut self, media: MediaSupport) -> Self {
        self.media = media;
        self
    }

    /// Adds a header sent with every request. Request headers of the same
    /// name replace it.
    #[must_use]
    pub fn default_header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        match header_pair(name, value) {
            Ok((name, value)) => {
                self.default_headers.append(name, value);
            }
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Appends a service; services run in the order they are added.
    #[must_use]
    pub fn service(mut self, service: impl WebClientService) -> Self {
        self.services.push(Arc::new(service));
        self
    }

    /// Appends a shared service.
    #[must_use]
    pub fn service_arc(mut self, service: Arc<dyn WebClientService>) -> Self {
        self.services.push(service);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an unusable base URI or default header.
    pub fn build(self) -> ConduitResult<WebClient> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let base_uri = self
            .base_uri
            .map(|raw| {
                let uri: Uri = raw.parse().map_err(|e| {
                    ConduitError::invalid_request(format!("invalid base URI '{raw}': {e}"))
                })?;
                if !matches!(uri.scheme_str(), Some("http" | "https")) || uri.host().is_none() {
                    return Err(ConduitError::invalid_request(format!(
                        "base URI '{raw}' must be an absolute http or https URI"
                    )));
                }
                Ok(uri)
            })
            .transpose()?;

        let transport = Transport::new(HttpConnector::new(self.tls), &self.config, self.media.clone());
        info!(
            base_uri = ?base_uri.as_ref().map(ToString::to_string),
            services = self.services.len(),
            max_idle_per_key = self.config.max_idle_per_key,
            "Web client created"
        );

        Ok(WebClient {
            inner: Arc::new(ClientInner {
                base_uri,
                default_headers: self.default_headers,
                services: self.services,
                transport,
                config: self.config,
                media: self.media,
            }),
        })
    }
}

impl std::fmt::Debug for WebClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebClientBuilder")
            .field("base_uri", &self.base_uri)
            .field("tls", &self.tls)
            .field("config", &self.config)
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

fn header_pair<K, V>(name: K, value: V) -> ConduitResult<(HeaderName, HeaderValue)>
where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
{
    let name = HeaderName::try_from(name).map_err(|e| {
        let e: http::Error = e.into();
        ConduitError::invalid_request(format!("invalid header name: {e}"))
    })?;
    let value = HeaderValue::try_from(value).map_err(|e| {
        let e: http::Error = e.into();
        ConduitError::invalid_request(format!("invalid header value: {e}"))
    })?;
    Ok((name, value))
}

/// One request being prepared on a [`WebClient`].
///
/// Nothing is sent until [`send`](Self::send). Invalid input is reported by
/// `send` rather than by the individual methods.
pub struct ClientRequest {
    client: WebClient,
    method: Method,
    uri: Option<String>,
    paths: Vec<String>,
    query: QueryParams,
    headers: HeaderMap,
    properties: Vec<(String, String)>,
    fragment: Option<String>,
    timeout: Option<Duration>,
    entity: OutboundEntity,
    error: Option<ConduitError>,
}

impl ClientRequest {
    fn new(client: WebClient, method: Method) -> Self {
        Self {
            client,
            method,
            uri: None,
            paths: Vec::new(),
            query: QueryParams::new(),
            headers: HeaderMap::new(),
            properties: Vec::new(),
            fragment: None,
            timeout: None,
            entity: OutboundEntity::Empty,
            error: None,
        }
    }

    /// Sets the target. Absolute URIs replace the base URI; relative ones
    /// are appended to its path.
    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Appends path segments to the target.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Adds a query parameter value.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.add(name, value);
        self
    }

    /// Adds a header value.
    #[must_use]
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        match header_pair(name, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Sets a property visible to services.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Sets the fragment. It is visible to services and never sent.
    #[must_use]
    pub fn fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Limits the whole exchange up to the response head.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the entity.
    #[must_use]
    pub fn body(mut self, entity: impl Into<OutboundEntity>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Sets a structured entity, encoded by the codec for the request's
    /// `Content-Type` (JSON by default).
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

    /// Sets a streaming entity produced by `producer`, sent chunked.
    #[must_use]
    pub fn streaming<F, Fut>(mut self, producer: F) -> Self
    where
        F: FnOnce(EntityWriter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ConduitResult<()>> + Send + 'static,
    {
        self.entity = OutboundEntity::streaming(producer);
        self
    }

    /// Builds the [`ServiceRequest`] without sending it.
    pub fn build(self) -> ConduitResult<(WebClient, ServiceRequest)> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let uri = self.client.resolve(self.uri.as_deref())?;
        let mut request = ServiceRequest::new(self.method, uri)?;

        for segment in &self.paths {
            let joined = join_path(request.path(), segment);
            request.set_path(joined);
        }
        for (name, value) in self.query.iter() {
            request.add_query(name, value);
        }

        let mut headers = self.client.inner.default_headers.clone();
        for name in self.headers.keys() {
            headers.remove(name);
        }
        headers.extend(self.headers);
        *request.headers_mut() = headers;

        for (key, value) in self.properties {
            request.set_property(key, value);
        }
        if let Some(fragment) = self.fragment {
            request.set_fragment(fragment);
        }
        request.set_timeout(self.timeout).set_entity(self.entity);
        Ok((self.client, request))
    }

    /// Sends the request through the service chain.
    pub async fn send(self) -> ConduitResult<ServiceResponse> {
        let (client, request) = self.build()?;
        client.execute(request).await
    }
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("paths", &self.paths)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("entity", &self.entity)
            .finish_non_exhaustive()
    }
}
