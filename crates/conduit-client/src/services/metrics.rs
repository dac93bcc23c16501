//! Request metrics.

use tokio::time::Instant;

use conduit_core::{BoxFuture, ConduitResult};
use conduit_telemetry::metrics::{record_client_failure, record_client_request};
use conduit_telemetry::InFlightGuard;

use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use crate::service::{Chain, WebClientService};

/// Counts requests and failures and records their latency.
///
/// The latency covers the rest of the chain up to the response head; reading
/// the entity happens after this service returns. Errors are recorded and
/// returned unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsService;

impl MetricsService {
    /// Creates the service.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl WebClientService for MetricsService {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn handle<'a>(
        &'a self,
        chain: Chain<'a>,
        request: ServiceRequest,
    ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new();
            let method = request.method().clone();
            let start = Instant::now();

            let result = chain.proceed(request).await;
            match &result {
                Ok(response) => {
                    record_client_request(method.as_str(), response.status().as_u16(), start.elapsed());
                }
                Err(e) => record_client_failure(method.as_str(), e.kind().as_str(), start.elapsed()),
            }
            result
        })
    }
}
