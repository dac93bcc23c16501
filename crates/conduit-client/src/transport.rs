//! The terminal link of the chain: sends the request on a pooled connection.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderValue, Method, Version};
use http_body::{Body, Frame, SizeHint};
use hyper::body::Incoming;
use tracing::debug;

use conduit_core::media::content_type;
use conduit_core::{BoxError, BoxFuture, ConduitError, ConduitResult, MediaSupport, ReadableEntity};
use conduit_pool::{ConnectionKey, Lease, Pool, PoolStats};

use crate::config::ClientConfig;
use crate::connection::HttpConnector;
use crate::request::{Phase, ServiceRequest};
use crate::response::{ConnectionInfo, ServiceResponse};
use crate::service::Terminal;

/// Readiness attempts on idle connections before opening a fresh one.
const STALE_RETRIES: usize = 3;

/// Sends requests over HTTP/1.1 using the connection pool.
pub(crate) struct Transport {
    pool: Pool<HttpConnector>,
    media: MediaSupport,
    read_timeout: Option<Duration>,
    keep_alive: bool,
    stream_buffer: usize,
}

impl Transport {
    pub(crate) fn new(connector: HttpConnector, config: &ClientConfig, media: MediaSupport) -> Self {
        Self {
            pool: Pool::new(connector, config.pool_config()),
            media,
            read_timeout: config.read_timeout,
            keep_alive: config.keep_alive,
            stream_buffer: config.stream_buffer.max(1),
        }
    }

    pub(crate) fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub(crate) fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Leases a connection that is ready to send, skipping idle ones the peer
    /// has closed in the meantime.
    async fn ready_lease(&self, key: &ConnectionKey) -> ConduitResult<Lease<HttpConnector>> {
        let mut attempts = 0;
        loop {
            let mut lease = self.pool.acquire(key).await?;
            let ready = lease.connection_mut().sender().ready().await;
            match ready {
                Ok(()) => return Ok(lease),
                Err(e) if lease.is_reused() && attempts < STALE_RETRIES => {
                    debug!(connection_id = %lease.id(), error = %e, "Idle connection went stale");
                    attempts += 1;
                    lease.discard();
                }
                Err(e) => {
                    lease.discard();
                    return Err(ConduitError::protocol_with_source("connection not ready", e));
                }
            }
        }
    }

    async fn send(&self, request: ServiceRequest) -> ConduitResult<ServiceResponse> {
        request.phase_tracker().advance(Phase::TransportCall);
        let phase = request.phase_tracker().clone();
        let tls_identity = self.pool.connector().tls().map(crate::TlsConfig::identity);
        let key = request.connection_key(tls_identity);
        let host = HeaderValue::try_from(request.authority())
            .map_err(|e| ConduitError::invalid_request(format!("invalid host: {e}")))?;

        let (snapshot, target, entity) = request.freeze()?;
        let declared = content_type(snapshot.headers());
        let (body, encoded_as) = entity.into_body(&self.media, declared.as_ref(), self.stream_buffer)?;

        let mut wire = http::Request::builder()
            .method(snapshot.method().clone())
            .uri(target)
            .version(Version::HTTP_11)
            .body(body)
            .map_err(|e| ConduitError::invalid_request(e.to_string()))?;
        let headers = wire.headers_mut();
        headers.clone_from(snapshot.headers());
        if !headers.contains_key(HOST) {
            headers.insert(HOST, host);
        }
        if let Some(mime) = encoded_as.filter(|_| !headers.contains_key(CONTENT_TYPE)) {
            if let Ok(value) = HeaderValue::try_from(mime.as_ref()) {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        if !self.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        if wire.body().is_end_stream()
            && matches!(*wire.method(), Method::POST | Method::PUT | Method::PATCH)
            && !wire.headers().contains_key(CONTENT_LENGTH)
        {
            wire.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        let request_close = connection_close(wire.headers());

        let mut lease = self.ready_lease(&key).await?;
        let info = ConnectionInfo {
            id: lease.id(),
            reused: lease.is_reused(),
            key,
        };
        debug!(
            request_id = %snapshot.id(),
            connection_id = %info.id,
            reused = info.reused,
            method = %snapshot.method(),
            uri = %snapshot.uri(),
            "Sending request"
        );

        let exchange = lease.connection_mut().sender().send_request(wire);
        let outcome = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ConduitError::timeout("read", limit))
                .and_then(|result| result.map_err(hyper_error)),
            None => exchange.await.map_err(hyper_error),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!(request_id = %snapshot.id(), connection_id = %info.id, error = %e, "Exchange failed");
                lease.discard();
                return Err(e);
            }
        };

        let (parts, incoming) = response.into_parts();
        let reusable = self.keep_alive
            && !request_close
            && parts.version == Version::HTTP_11
            && !connection_close(&parts.headers);
        let received_type = content_type(&parts.headers);

        let body = LeasedBody::new(incoming, lease, reusable);
        let entity = ReadableEntity::new(body, received_type, self.media.clone())
            .with_read_timeout(self.read_timeout);

        phase.advance(Phase::ResponseTraversal);
        Ok(ServiceResponse::from_transport(parts, entity, snapshot, info))
    }
}

impl Terminal for Transport {
    fn call(&self, request: ServiceRequest) -> BoxFuture<'_, ConduitResult<ServiceResponse>> {
        Box::pin(self.send(request))
    }
}

fn connection_close(headers: &http::HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

fn hyper_error(error: hyper::Error) -> ConduitError {
    if let Some(conduit) = find_conduit_error(&error) {
        return conduit;
    }
    ConduitError::protocol_with_source("HTTP exchange failed", error)
}

/// Recovers errors raised by an outbound entity producer, such as a
/// `StreamClosed`, so the caller sees the original error.
fn find_conduit_error(error: &hyper::Error) -> Option<ConduitError> {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(conduit) = cause.downcast_ref::<ConduitError>() {
            return Some(match conduit {
                ConduitError::StreamClosed => ConduitError::StreamClosed,
                ConduitError::EntityConversion { .. } => {
                    ConduitError::entity_conversion(conduit.to_string())
                }
                other => ConduitError::protocol(other.to_string()),
            });
        }
        source = cause.source();
    }
    None
}

/// Response body that owns the lease until the body is fully read.
///
/// Reaching the end returns the connection to the pool when it is reusable.
/// A read error, or dropping the body early, closes the connection.
struct LeasedBody {
    inner: Incoming,
    lease: Option<Lease<HttpConnector>>,
    reusable: bool,
}

impl LeasedBody {
    fn new(inner: Incoming, lease: Lease<HttpConnector>, reusable: bool) -> Self {
        let mut body = Self {
            inner,
            lease: Some(lease),
            reusable,
        };
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    fn finish(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release(self.reusable);
        }
    }

    fn fail(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.discard();
        }
    }
}

impl Body for LeasedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.fail();
                Poll::Ready(Some(Err(Box::new(ConduitError::protocol_with_source(
                    "failed to read response entity",
                    e,
                )))))
            }
            Poll::Ready(Some(Ok(frame))) => {
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LeasedBody {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            debug!(connection_id = %lease.id(), "Response entity dropped before completion");
            lease.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn test_connection_close_token() {
        let mut headers = HeaderMap::new();
        assert!(!connection_close(&headers));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Close"));
        assert!(connection_close(&headers));
        headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
        assert!(!connection_close(&headers));
    }
}
