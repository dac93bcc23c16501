//! Closure-based request mutation.

use conduit_core::{BoxFuture, ConduitResult};

use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use crate::service::{Chain, WebClientService};

type Mapper = Box<dyn Fn(&mut ServiceRequest) -> ConduitResult<()> + Send + Sync>;

/// Applies a closure to every request before passing it on.
///
/// ```
/// use conduit_client::services::MapRequestService;
/// use http::{HeaderName, HeaderValue};
///
/// let tenant = MapRequestService::new("tenant", |request| {
///     request.set_header(HeaderName::from_static("x-tenant"), HeaderValue::from_static("acme"));
///     Ok(())
/// });
/// ```
pub struct MapRequestService {
    name: &'static str,
    mapper: Mapper,
}

impl MapRequestService {
    /// Creates a service named `name` running `mapper` on each request.
    /// An error from `mapper` fails the request without calling the rest of
    /// the chain.
    pub fn new<F>(name: &'static str, mapper: F) -> Self
    where
        F: Fn(&mut ServiceRequest) -> ConduitResult<()> + Send + Sync + 'static,
    {
        Self {
            name,
            mapper: Box::new(mapper),
        }
    }
}

impl std::fmt::Debug for MapRequestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRequestService")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WebClientService for MapRequestService {
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        chain: Chain<'a>,
        mut request: ServiceRequest,
    ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
        Box::pin(async move {
            (self.mapper)(&mut request)?;
            chain.proceed(request).await
        })
    }
}
