//! Built-in client services.
//!
//! | Service | Purpose |
//! |---------|---------|
//! | [`MetricsService`] | Request counts, failures and latency through the `metrics` facade |
//! | [`TracingService`] | A `tracing` span per request, optional request id header |
//! | [`OutboundSecurityService`] | Adds credentials from an [`OutboundSecurityProvider`] |
//! | [`MapRequestService`] | Applies a closure to every request |
//! | [`RetryService`] | Retries requests that never reached the server |

mod map;
mod metrics;
mod retry;
mod security;
mod trace;

pub use map::MapRequestService;
pub use metrics::MetricsService;
pub use retry::RetryService;
pub use security::{
    OutboundEnv, OutboundSecurityProvider, OutboundSecurityService, ENV_PROPERTY_PREFIX,
    SKIP_SECURITY_PROPERTY,
};
pub use trace::TracingService;
