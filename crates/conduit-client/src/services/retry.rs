//! Retries for requests that never reached the server.

use std::time::Duration;

use tracing::debug;

use conduit_core::{BoxFuture, ConduitResult};

use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use crate::service::{Chain, WebClientService};

/// Retries a request when it failed before a connection was established.
///
/// Only connect failures, TLS failures, pool exhaustion and connect or
/// acquire timeouts qualify (see [`ConduitError::is_retryable`]), so a
/// retried request was never seen by the server. Requests with a streaming
/// entity are never retried.
///
/// [`ConduitError::is_retryable`]: conduit_core::ConduitError::is_retryable
#[derive(Debug, Clone, Copy)]
pub struct RetryService {
    max_retries: u32,
    backoff: Duration,
}

impl RetryService {
    /// Retries up to `max_retries` times.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(50),
        }
    }

    /// Sets the base delay; it doubles after each attempt.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl WebClientService for RetryService {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn handle<'a>(
        &'a self,
        chain: Chain<'a>,
        request: ServiceRequest,
    ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
        Box::pin(async move {
            let mut current = request;
            let mut attempt = 0;
            loop {
                let spare = if attempt < self.max_retries {
                    current.try_clone()
                } else {
                    None
                };
                let id = current.id();

                match chain.proceed(current).await {
                    Err(e) if e.is_retryable() => match spare {
                        Some(next) => {
                            let delay = self.backoff.saturating_mul(1 << attempt.min(16));
                            attempt += 1;
                            debug!(request_id = %id, attempt, error = %e, ?delay, "Retrying request");
                            tokio::time::sleep(delay).await;
                            current = next;
                        }
                        None => return Err(e),
                    },
                    result => return result,
                }
            }
        })
    }
}
