//! Outbound credentials.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::{HeaderMap, Method, Uri};
use tracing::debug;

use conduit_core::{BoxError, BoxFuture, ConduitError, ConduitResult};

use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use crate::service::{Chain, WebClientService};

/// Request property that skips outbound security when set to `true`.
pub const SKIP_SECURITY_PROPERTY: &str = "security.outbound.skip";

/// Request properties with this prefix become attributes of the derived
/// [`OutboundEnv`], with the prefix removed.
pub const ENV_PROPERTY_PREFIX: &str = "security.env.";

/// What a security provider knows about the outbound call.
///
/// The service holds a template environment shared by every request. Each
/// request derives its own copy; attributes are copied only when a request
/// writes one, so the template itself never changes.
#[derive(Debug, Clone, Default)]
pub struct OutboundEnv {
    attributes: Arc<BTreeMap<String, String>>,
    method: Option<Method>,
    target: Option<Uri>,
}

impl OutboundEnv {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute while building a template.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Sets an attribute on this environment only.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        Arc::make_mut(&mut self.attributes).insert(key.into(), value.into());
        self
    }

    /// Returns an attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns the method of the outbound call.
    #[must_use]
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// Returns the target URI of the outbound call.
    #[must_use]
    pub fn target(&self) -> Option<&Uri> {
        self.target.as_ref()
    }

    /// Returns `true` if both environments still share one attribute map.
    #[must_use]
    pub fn shares_attributes_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.attributes, &other.attributes)
    }

    /// Derives the environment of one request.
    pub fn derive(&self, request: &ServiceRequest) -> ConduitResult<Self> {
        let mut env = self.clone();
        env.method = Some(request.method().clone());
        env.target = Some(request.uri()?);
        for (key, value) in request.properties() {
            if let Some(attribute) = key.strip_prefix(ENV_PROPERTY_PREFIX) {
                env.set_attribute(attribute, value.clone());
            }
        }
        Ok(env)
    }
}

/// Produces credentials for outbound calls.
pub trait OutboundSecurityProvider: Send + Sync + 'static {
    /// Returns the name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Returns the headers to add to the request described by `env`.
    fn outbound<'a>(&'a self, env: &'a OutboundEnv) -> BoxFuture<'a, Result<HeaderMap, BoxError>>;
}

/// Adds the headers of an [`OutboundSecurityProvider`] to every request.
///
/// Provider headers replace request headers of the same name. A provider
/// failure fails the request with a service chain failure carrying the
/// provider error. Setting the [`SKIP_SECURITY_PROPERTY`] property to `true`
/// sends the request without credentials.
pub struct OutboundSecurityService {
    provider: Arc<dyn OutboundSecurityProvider>,
    template: OutboundEnv,
}

impl OutboundSecurityService {
    /// Creates the service with an empty template environment.
    pub fn new(provider: impl OutboundSecurityProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            template: OutboundEnv::new(),
        }
    }

    /// Sets the template every request environment is derived from.
    #[must_use]
    pub fn with_env(mut self, template: OutboundEnv) -> Self {
        self.template = template;
        self
    }

    /// Returns the template environment.
    #[must_use]
    pub fn template(&self) -> &OutboundEnv {
        &self.template
    }
}

impl std::fmt::Debug for OutboundSecurityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSecurityService")
            .field("provider", &self.provider.name())
            .field("template", &self.template)
            .finish()
    }
}

impl WebClientService for OutboundSecurityService {
    fn name(&self) -> &'static str {
        "security"
    }

    fn handle<'a>(
        &'a self,
        chain: Chain<'a>,
        mut request: ServiceRequest,
    ) -> BoxFuture<'a, ConduitResult<ServiceResponse>> {
        Box::pin(async move {
            if request
                .property(SKIP_SECURITY_PROPERTY)
                .is_some_and(|value| value.eq_ignore_ascii_case("true"))
            {
                debug!(request_id = %request.id(), "Outbound security skipped");
                return chain.proceed(request).await;
            }

            let env = self.template.derive(&request)?;
            let headers = self
                .provider
                .outbound(&env)
                .await
                .map_err(|e| ConduitError::service(self.provider.name(), e))?;

            for name in headers.keys() {
                request.headers_mut().remove(name);
            }
            request.headers_mut().extend(headers);
            chain.proceed(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Terminal;
    use http::header::AUTHORIZATION;
    use http::{HeaderValue, StatusCode};

    /// Issues a bearer token for the `user` attribute; fails without one.
    struct TokenProvider;

    impl OutboundSecurityProvider for TokenProvider {
        fn name(&self) -> &'static str {
            "token"
        }

        fn outbound<'a>(&'a self, env: &'a OutboundEnv) -> BoxFuture<'a, Result<HeaderMap, BoxError>> {
            Box::pin(async move {
                let user = env.attribute("user").ok_or("no user in environment")?;
                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, HeaderValue::try_from(format!("Bearer {user}"))?);
                Ok(headers)
            })
        }
    }

    /// Echoes the authorization header back as the status: 200 with, 401 without.
    struct Echo;

    impl Terminal for Echo {
        fn call(&self, request: ServiceRequest) -> BoxFuture<'_, ConduitResult<ServiceResponse>> {
            Box::pin(async move {
                let status = if request.headers().contains_key(AUTHORIZATION) {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                };
                let mut response = ServiceResponse::new(status, request.snapshot()?);
                if let Some(value) = request.headers().get(AUTHORIZATION) {
                    response = response.with_header(AUTHORIZATION, value.clone());
                }
                Ok(response)
            })
        }
    }

    fn request() -> ServiceRequest {
        ServiceRequest::new(Method::GET, "http://svc/orders".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_derive_does_not_touch_template() {
        let template = OutboundEnv::new().with_attribute("realm", "internal");
        let mut req = request();
        req.set_property("security.env.user", "alice");

        let env = template.derive(&req).unwrap();
        assert_eq!(env.attribute("user"), Some("alice"));
        assert_eq!(env.attribute("realm"), Some("internal"));
        assert_eq!(env.method(), Some(&Method::GET));
        assert_eq!(template.attribute("user"), None);
        assert!(!env.shares_attributes_with(&template));

        let untouched = template.derive(&request()).unwrap();
        assert!(untouched.shares_attributes_with(&template));
    }

    #[tokio::test]
    async fn test_provider_headers_are_added() {
        let service: Arc<dyn WebClientService> = Arc::new(
            OutboundSecurityService::new(TokenProvider)
                .with_env(OutboundEnv::new().with_attribute("user", "svc-account")),
        );
        let services = [service];
        let mut req = request();
        req.set_header(AUTHORIZATION, HeaderValue::from_static("Basic stale"));

        let response = Chain::new(&services, &Echo).proceed(req).await.unwrap();
        assert_eq!(response.header("authorization"), Some("Bearer svc-account"));
    }

    #[tokio::test]
    async fn test_provider_failure_is_chain_failure() {
        let services: [Arc<dyn WebClientService>; 1] = [Arc::new(OutboundSecurityService::new(TokenProvider))];

        let err = Chain::new(&services, &Echo).proceed(request()).await.unwrap_err();
        assert_eq!(err.failed_service(), Some("token"));
        assert!(err.to_string().contains("no user in environment"));
    }

    #[tokio::test]
    async fn test_skip_property() {
        let services: [Arc<dyn WebClientService>; 1] = [Arc::new(OutboundSecurityService::new(TokenProvider))];
        let mut req = request();
        req.set_property(SKIP_SECURITY_PROPERTY, "true");

        let response = Chain::new(&services, &Echo).proceed(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
