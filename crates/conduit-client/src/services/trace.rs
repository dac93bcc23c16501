//! Request spans and logs.

use http::header::{HeaderName, HeaderValue};
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

use conduit_core::{BoxFuture, ConduitResult};

use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use crate::service::{Chain, WebClientService};

/// Wraps the rest of the chain in a `client_request` span carrying the
/// request id, and logs the outcome.
///
/// With [`propagate_header`](Self::propagate_header) the request id is also
/// sent to the server.
#[derive(Debug, Clone, Default)]
pub struct TracingService {
    header: Option<HeaderName>,
}

impl TracingService {
    /// Creates the service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the request id in `header`, unless the request already has one.
    #[must_use]
    pub fn propagate_header(mut self, header: HeaderName) -> Self {
        self.header = Some(header);
        self
    }
}

impl WebClientService for TracingService {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn handle<'a>(
        &'a self,
        chain: Chain<'a>,
        mut request: ServiceRequest,
    ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
        let span = info_span!(
            "client_request",
            request_id = %request.id(),
            method = %request.method(),
            host = %request.host(),
            path = %request.path(),
        );

        Box::pin(
            async move {
                if let Some(header) = &self.header {
                    if !request.headers().contains_key(header) {
                        if let Ok(value) = HeaderValue::try_from(request.id().to_string()) {
                            request.set_header(header.clone(), value);
                        }
                    }
                }

                let start = Instant::now();
                debug!("Request started");
                let result = chain.proceed(request).await;
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                match &result {
                    Ok(response) => debug!(
                        status = response.status().as_u16(),
                        connection_id = ?response.connection().map(|c| c.id.as_u64()),
                        duration_ms = elapsed_ms,
                        "Response received"
                    ),
                    Err(e) => warn!(
                        error = %e,
                        kind = e.kind().as_str(),
                        duration_ms = elapsed_ms,
                        "Request failed"
                    ),
                }
                result
            }
            .instrument(span),
        )
    }
}
