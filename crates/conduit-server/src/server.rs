//! The HTTP/1.1 server loop.
//!
//! One task accepts connections; each connection is served by hyper on its
//! own task and each request runs the routing on that task. A handler that
//! runs past the request timeout is dropped and the client gets a 504.
//!
//! ```rust,ignore
//! use conduit_server::{Routing, Server, ServerRequest, ServerResponse};
//!
//! let routing = Routing::builder()
//!     .get("/ping", |_req: ServerRequest| async { Ok(ServerResponse::ok().body("pong")) })
//!     .build();
//!
//! let handle = Server::builder()
//!     .http_addr("127.0.0.1:0")
//!     .routing(routing)
//!     .build()
//!     .start()
//!     .await?;
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown().await?;
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use conduit_config::ServerSettings;
use conduit_core::media::content_type;
use conduit_core::{ConduitError, ConduitResult, EntityBody, MediaSupport, ReadableEntity};
use conduit_telemetry::metrics::record_server_request;

use crate::config::{ServerConfig, ServerConfigBuilder};
use crate::error::{ServerError, ServerResult};
use crate::request::ServerRequest;
use crate::response::ServerResponse;
use crate::routing::Routing;
use crate::shutdown::{wait_for_os_signal, ConnectionToken, ConnectionTracker, ShutdownSignal};

/// A configured server, not yet listening.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    routing: Routing,
    media: MediaSupport,
}

impl Server {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the routing.
    #[must_use]
    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Binds the listener and starts accepting connections in the background.
    pub async fn start(self) -> ServerResult<ServerHandle> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(addr = %local_addr, routes = self.routing.len(), "Server listening");

        let shutdown = ShutdownSignal::new();
        let tracker = ConnectionTracker::new();
        let shutdown_timeout = self.config.shutdown_timeout();
        let acceptor = Acceptor {
            listener,
            limit: self.config.max_connections().map(|max| Arc::new(Semaphore::new(max))),
            shared: Arc::new(Shared {
                config: self.config,
                routing: self.routing,
                media: self.media,
            }),
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
        };
        let task = tokio::spawn(acceptor.run());

        Ok(ServerHandle {
            local_addr,
            shutdown,
            tracker,
            shutdown_timeout,
            task,
        })
    }

    /// Serves until SIGINT or SIGTERM, then shuts down gracefully.
    pub async fn run(self) -> ServerResult<()> {
        let handle = self.start().await?;
        wait_for_os_signal().await.map_err(ServerError::Signal)?;
        handle.shutdown().await
    }
}

/// Builder for [`Server`].
#[derive(Debug)]
pub struct ServerBuilder {
    config: ServerConfigBuilder,
    routing: Routing,
    media: MediaSupport,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration and no routes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig::builder(),
            routing: Routing::default(),
            media: MediaSupport::default(),
        }
    }

    /// Creates a builder from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self::new().config(ServerConfig::from(settings))
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = ServerConfigBuilder::from(config);
        self
    }

    /// Sets the bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config = self.config.http_addr(addr);
        self
    }

    /// Sets the handler timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.shutdown_timeout(timeout);
        self
    }

    /// Enables or disables keep-alive.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config = self.config.keep_alive(keep_alive);
        self
    }

    /// Sets the routes.
    #[must_use]
    pub fn routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the codecs for request and response entities.
    #[must_use]
    pub fn media(mut self, media: MediaSupport) -> Self {
        self.media = media;
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        Server {
            config: self.config.build(),
            routing: self.routing,
            media: self.media,
        }
    }
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
    shutdown_timeout: Duration,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Returns the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `http://<local address>`.
    #[must_use]
    pub fn base_uri(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.tracker.active_connections()
    }

    /// Returns the shutdown signal, for triggering shutdown from elsewhere.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stops accepting, lets open connections finish their current exchange
    /// and waits for them up to the shutdown timeout.
    pub async fn shutdown(self) -> ServerResult<()> {
        self.shutdown.trigger();
        self.task.await.map_err(|e| ServerError::Task(e.to_string()))?;

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait_idle())
            .await
            .is_err()
        {
            warn!(
                active = self.tracker.active_connections(),
                "Shutdown timeout reached with connections still open"
            );
        }
        info!(addr = %self.local_addr, "Server stopped");
        Ok(())
    }
}

struct Acceptor {
    listener: TcpListener,
    limit: Option<Arc<Semaphore>>,
    shared: Arc<Shared>,
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
}

impl Acceptor {
    async fn run(self) {
        loop {
            let permit = match &self.limit {
                Some(limit) => tokio::select! {
                    permit = Arc::clone(limit).acquire_owned() => permit.ok(),
                    () = self.shutdown.recv() => break,
                },
                None => None,
            };

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let connection = Connection {
                            shared: Arc::clone(&self.shared),
                            shutdown: self.shutdown.clone(),
                            _token: self.tracker.acquire(),
                            _permit: permit,
                        };
                        tokio::spawn(connection.serve(stream, remote));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                () = self.shutdown.recv() => break,
            }
        }
        debug!("Accept loop stopped");
    }
}

struct Connection {
    shared: Arc<Shared>,
    shutdown: ShutdownSignal,
    _token: ConnectionToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    async fn serve(self, stream: TcpStream, remote: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(remote = %remote, error = %e, "Failed to set TCP_NODELAY");
        }
        let shared = Arc::clone(&self.shared);
        let service = service_fn(move |request: Request<Incoming>| {
            let shared = Arc::clone(&shared);
            async move { Ok::<_, Infallible>(shared.handle(request, remote).await) }
        });

        let conn = http1::Builder::new()
            .keep_alive(self.shared.config.keep_alive())
            .serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = self.shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            debug!(remote = %remote, error = %e, "Connection ended with an error");
        }
    }
}

struct Shared {
    config: ServerConfig,
    routing: Routing,
    media: MediaSupport,
}

impl Shared {
    async fn handle(&self, request: Request<Incoming>, remote: SocketAddr) -> Response<EntityBody> {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let entity = ReadableEntity::new(body, content_type(&parts.headers), self.media.clone());

        let response = match ServerRequest::new(parts.method, parts.uri, parts.version, parts.headers, entity) {
            Ok(request) => {
                let id = request.id();
                debug!(request_id = %id, method = %method, path = %path, remote = %remote, "Request received");
                let limit = self.config.request_timeout();
                match tokio::time::timeout(limit, self.routing.dispatch(request.with_remote_addr(remote))).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => failure_response(&e),
                    Err(_) => {
                        warn!(request_id = %id, method = %method, path = %path, timeout = ?limit, "Handler timed out");
                        ServerResponse::error(
                            StatusCode::GATEWAY_TIMEOUT,
                            "REQUEST_TIMEOUT",
                            &format!("handler did not complete within {limit:?}"),
                        )
                    }
                }
            }
            Err(e) => failure_response(&e),
        };

        let wire = self.write(response).unwrap_or_else(|e| {
            warn!(method = %method, path = %path, error = %e, "Failed to write response");
            self.write(failure_response(&e)).unwrap_or_else(|_| {
                let mut fallback = Response::new(EntityBody::empty());
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
        });
        record_server_request(method.as_str(), wire.status().as_u16(), started.elapsed());
        wire
    }

    fn write(&self, response: ServerResponse) -> ConduitResult<Response<EntityBody>> {
        let (status, mut headers, entity) = response.into_parts()?;
        let declared = content_type(&headers);
        let (body, encoded_as) =
            entity.into_body(&self.media, declared.as_ref(), self.config.stream_buffer())?;
        if let Some(mime) = encoded_as.filter(|_| !headers.contains_key(CONTENT_TYPE)) {
            if let Ok(value) = HeaderValue::try_from(mime.as_ref()) {
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let mut wire = Response::new(body);
        *wire.status_mut() = status;
        *wire.headers_mut() = headers;
        Ok(wire)
    }
}

/// Maps a handler error to a JSON error response.
fn failure_response(error: &ConduitError) -> ServerResponse {
    let kind = error.kind();
    let status = kind.default_status_code();
    if status.is_server_error() {
        warn!(error = %error, kind = %kind, "Handler failed");
    } else {
        debug!(error = %error, kind = %kind, "Request rejected");
    }
    ServerResponse::error(status, &kind.as_str().to_ascii_uppercase(), &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_status_mapping() {
        let response = failure_response(&ConduitError::entity_conversion("bad json"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = failure_response(&ConduitError::service("db", "down"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_start_on_port_zero_and_shutdown() {
        let handle = Server::builder().http_addr("127.0.0.1:0").build().start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.base_uri().starts_with("http://127.0.0.1:"));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = Server::builder().http_addr("127.0.0.1:0").build().start().await.unwrap();
        let err = Server::builder()
            .http_addr(first.local_addr().to_string())
            .build()
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        first.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_sets_content_type_for_structured_entity() {
        let shared = Shared {
            config: ServerConfig::default(),
            routing: Routing::default(),
            media: MediaSupport::default(),
        };
        let wire = shared
            .write(ServerResponse::ok().json(&serde_json::json!({"ok": true})))
            .unwrap();
        assert_eq!(wire.status(), StatusCode::OK);
        assert_eq!(wire.headers()[CONTENT_TYPE], "application/json");
    }
}
