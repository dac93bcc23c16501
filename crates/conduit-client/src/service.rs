//! The client service chain.
//!
//! Services run in declaration order on the way out. Because each one awaits
//! [`Chain::proceed`] and gets the response back from it, the code after
//! `proceed` runs in reverse declaration order on the way back.
//!
//! ```ignore
//! use conduit_client::{Chain, ServiceRequest, ServiceResponse, WebClientService};
//! use conduit_core::{BoxFuture, ConduitResult};
//!
//! struct Stamp;
//!
//! impl WebClientService for Stamp {
//!     fn name(&self) -> &'static str {
//!         "stamp"
//!     }
//!
//!     fn handle<'a>(
//!         &'a self,
//!         chain: Chain<'a>,
//!         mut request: ServiceRequest,
//!     ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
//!         Box::pin(async move {
//!             request.set_property("stamped", "true");
//!             let response = chain.proceed(request).await?;
//!             tracing::debug!(status = %response.status(), "stamped request answered");
//!             Ok(response)
//!         })
//!     }
//! }
//! ```

use std::sync::Arc;

use tracing::trace;

use conduit_core::{BoxFuture, ConduitResult};

use crate::request::ServiceRequest;
use crate::response::ServiceResponse;

/// A unit of request/response processing around the transport call.
///
/// A service is created once when the client is built and shared by every
/// request. It may pass the request on unchanged, change it first, look at
/// or change the response, or answer itself without calling
/// [`Chain::proceed`].
pub trait WebClientService: Send + Sync + 'static {
    /// Returns the name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Handles one request.
    fn handle<'a>(
        &'a self,
        chain: Chain<'a>,
        request: ServiceRequest,
    ) -> BoxFuture<'a, ConduitResult<ServiceResponse>>;
}

/// The innermost link of a chain: the call that actually produces a response.
pub trait Terminal: Send + Sync {
    /// Produces the response for a request that went through every service.
    fn call(&self, request: ServiceRequest) -> BoxFuture<'_, ConduitResult<ServiceResponse>>;
}

/// The services left for one request plus the terminal call.
///
/// A chain is a cursor over a borrowed list, so building one per request
/// costs nothing. It is `Clone` so a service may proceed more than once.
#[derive(Clone, Copy)]
pub struct Chain<'a> {
    services: &'a [Arc<dyn WebClientService>],
    terminal: &'a dyn Terminal,
}

impl<'a> Chain<'a> {
    /// Creates a chain over `services` ending in `terminal`.
    pub fn new(services: &'a [Arc<dyn WebClientService>], terminal: &'a dyn Terminal) -> Self {
        Self { services, terminal }
    }

    /// Returns how many services are left before the terminal call.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.services.len()
    }

    /// Hands the request to the next service, or to the terminal call when
    /// none is left.
    pub fn proceed(self, request: ServiceRequest) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
        match self.services.split_first() {
            Some((service, rest)) => {
                trace!(request_id = %request.id(), service = service.name(), "Entering service");
                let next = Chain {
                    services: rest,
                    terminal: self.terminal,
                };
                service.handle(next, request)
            }
            None => self.terminal.call(request),
        }
    }
}

impl std::fmt::Debug for Chain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.services.iter().map(|s| s.name()).collect();
        f.debug_struct("Chain").field("services", &names).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue, Method, StatusCode};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conduit_core::ConduitError;

    /// Records what it sees on the way in and out.
    struct Marker {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl WebClientService for Marker {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handle<'a>(
            &'a self,
            chain: Chain<'a>,
            mut request: ServiceRequest,
        ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
            Box::pin(async move {
                let seen = request.property("trail").unwrap_or_default().to_string();
                self.log.lock().push(format!("in:{}:{seen}", self.name));
                request.set_property("trail", format!("{seen}{}", self.name));

                let response = chain.proceed(request).await?;
                self.log.lock().push(format!("out:{}", self.name));
                Ok(response)
            })
        }
    }

    /// Answers with the trail header; counts calls.
    #[derive(Default)]
    struct EchoTerminal {
        calls: AtomicUsize,
    }

    impl Terminal for EchoTerminal {
        fn call(&self, request: ServiceRequest) -> BoxFuture<'_, ConduitResult<ServiceResponse>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let trail = request.property("trail").unwrap_or_default().to_string();
                let snapshot = request.snapshot()?;
                Ok(ServiceResponse::new(StatusCode::OK, snapshot).with_header(
                    HeaderName::from_static("x-trail"),
                    HeaderValue::try_from(trail).map_err(|e| ConduitError::service("echo-terminal", e))?,
                ))
            })
        }
    }

    struct ShortCircuit;

    impl WebClientService for ShortCircuit {
        fn name(&self) -> &'static str {
            "short-circuit"
        }

        fn handle<'a>(
            &'a self,
            _chain: Chain<'a>,
            request: ServiceRequest,
        ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
            Box::pin(async move { Ok(ServiceResponse::new(StatusCode::ACCEPTED, request.snapshot()?)) })
        }
    }

    fn request() -> ServiceRequest {
        ServiceRequest::new(Method::GET, "http://localhost/".parse().unwrap()).unwrap()
    }

    fn markers(log: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn WebClientService>> {
        ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                Arc::new(Marker {
                    name,
                    log: Arc::clone(log),
                }) as Arc<dyn WebClientService>
            })
            .collect()
    }

    #[tokio::test]
    async fn test_request_path_fifo_response_path_lifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let services = markers(&log);
        let echo = EchoTerminal::default();

        let response = Chain::new(&services, &echo).proceed(request()).await.unwrap();

        assert_eq!(response.header("x-trail"), Some("abc"));
        assert_eq!(
            *log.lock(),
            ["in:a:", "in:b:a", "in:c:ab", "out:c", "out:b", "out:a"]
        );
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut services = markers(&log);
        services.insert(1, Arc::new(ShortCircuit));
        let echo = EchoTerminal::default();

        let chain = Chain::new(&services, &echo);
        assert_eq!(chain.remaining(), 4);
        let response = chain.proceed(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock(), ["in:a:", "out:a"]);
    }

    #[tokio::test]
    async fn test_empty_chain_calls_terminal() {
        let echo = EchoTerminal::default();
        let response = Chain::new(&[], &echo).proceed(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }
}
