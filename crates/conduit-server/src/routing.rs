//! Method and path routing.
//!
//! Routes are tried in the order they were registered. Every route whose
//! method and path match gets a turn; the first handler that completes wins
//! and a handler may hand the request on with [`HandlerOutcome::Next`].
//! Requests no handler completes get a 404 JSON response.
//!
//! ```rust
//! use conduit_server::{Routing, ServerRequest, ServerResponse};
//!
//! let routing = Routing::builder()
//!     .get("/orders/{id}", |req: ServerRequest| async move {
//!         let id = req.param("id").unwrap_or_default().to_string();
//!         Ok(ServerResponse::ok().body(id))
//!     })
//!     .any("/static/*", |req: ServerRequest| async move {
//!         Ok(ServerResponse::ok().body(req.param("*").unwrap_or_default().to_string()))
//!     })
//!     .build();
//!
//! assert_eq!(routing.len(), 2);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use http::{Method, StatusCode};
use tracing::trace;

use conduit_core::{BoxFuture, ConduitResult};

use crate::request::ServerRequest;
use crate::response::ServerResponse;

/// Name under which the trailing wildcard match is stored.
pub const WILDCARD_PARAM: &str = "*";

/// What a handler did with a request.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The handler answered.
    Complete(ServerResponse),
    /// The handler passed; the next matching route gets the request.
    Next(ServerRequest),
}

impl From<ServerResponse> for HandlerOutcome {
    fn from(response: ServerResponse) -> Self {
        Self::Complete(response)
    }
}

/// Handles requests for a route.
///
/// Implemented for async closures taking a [`ServerRequest`] and returning a
/// [`ServerResponse`] or [`HandlerOutcome`].
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn handle(&self, request: ServerRequest) -> BoxFuture<'_, ConduitResult<HandlerOutcome>>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConduitResult<R>> + Send + 'static,
    R: Into<HandlerOutcome>,
{
    fn handle(&self, request: ServerRequest) -> BoxFuture<'_, ConduitResult<HandlerOutcome>> {
        let fut = self(request);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A parsed path pattern such as `/orders/{id}/items/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern. `{name}` captures one segment; a final `*` captures
    /// the rest of the path, possibly empty.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.len().saturating_sub(1);
        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if *part == "*" && i == last {
                    Segment::Wildcard
                } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal((*part).to_string())
                }
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches `path`, returning the captured parameters.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.insert(WILDCARD_PARAM.to_string(), actual.get(i..).unwrap_or_default().join("/"));
                    return Some(params);
                }
                Segment::Literal(expected) => {
                    if actual.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*actual.get(i)?).to_string());
                }
            }
        }

        (actual.len() == self.segments.len()).then_some(params)
    }
}

struct Route {
    method: Option<Method>,
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
}

/// An ordered list of routes.
#[derive(Clone, Default)]
pub struct Routing {
    routes: Arc<Vec<Route>>,
}

impl Routing {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RoutingBuilder {
        RoutingBuilder::default()
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs matching handlers until one completes.
    pub async fn dispatch(&self, mut request: ServerRequest) -> ConduitResult<ServerResponse> {
        for route in self.routes.iter() {
            if route.method.as_ref().is_some_and(|m| m != request.method()) {
                continue;
            }
            let Some(params) = route.pattern.matches(request.path()) else {
                continue;
            };
            trace!(request_id = %request.id(), pattern = route.pattern.as_str(), "Route matched");
            request.set_params(params);
            match route.handler.handle(request).await? {
                HandlerOutcome::Complete(response) => return Ok(response),
                HandlerOutcome::Next(passed) => request = passed,
            }
        }
        Ok(not_found(&request))
    }
}

impl std::fmt::Debug for Routing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: Vec<String> = self
            .routes
            .iter()
            .map(|r| {
                let method = r.method.as_ref().map_or("*", Method::as_str);
                format!("{method} {}", r.pattern.as_str())
            })
            .collect();
        f.debug_struct("Routing").field("routes", &routes).finish()
    }
}

fn not_found(request: &ServerRequest) -> ServerResponse {
    ServerResponse::error(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        &format!("no route for {} {}", request.method(), request.path()),
    )
}

/// Builder for [`Routing`].
#[derive(Default)]
pub struct RoutingBuilder {
    routes: Vec<Route>,
}

impl RoutingBuilder {
    /// Adds a route. `None` matches every method.
    #[must_use]
    pub fn route(mut self, method: impl Into<Option<Method>>, pattern: &str, handler: impl Handler) -> Self {
        self.routes.push(Route {
            method: method.into(),
            pattern: PathPattern::parse(pattern),
            handler: Arc::new(handler),
        });
        self
    }

    /// Adds an async closure for every method.
    #[must_use]
    pub fn any<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<R>> + Send + 'static,
        R: Into<HandlerOutcome>,
    {
        self.route(None::<Method>, pattern, handler)
    }

    /// Adds an async closure for `GET`.
    #[must_use]
    pub fn get<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<R>> + Send + 'static,
        R: Into<HandlerOutcome>,
    {
        self.route(Method::GET, pattern, handler)
    }

    /// Adds an async closure for `POST`.
    #[must_use]
    pub fn post<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<R>> + Send + 'static,
        R: Into<HandlerOutcome>,
    {
        self.route(Method::POST, pattern, handler)
    }

    /// Adds an async closure for `PUT`.
    #[must_use]
    pub fn put<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<R>> + Send + 'static,
        R: Into<HandlerOutcome>,
    {
        self.route(Method::PUT, pattern, handler)
    }

    /// Adds an async closure for `DELETE`.
    #[must_use]
    pub fn delete<F, Fut, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<R>> + Send + 'static,
        R: Into<HandlerOutcome>,
    {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Builds the routing.
    #[must_use]
    pub fn build(self) -> Routing {
        Routing {
            routes: Arc::new(self.routes),
        }
    }
}
