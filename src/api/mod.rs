//! # HTTP API
//!
//! The caller-facing surface: `GET /secret/{name}`, `POST /refresh`,
//! `GET /health` and, when enabled, `GET /metrics`.

pub mod error;
pub mod handlers;
pub mod ip_allowlist;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod validation;

pub use error::ApiError;
pub use ip_allowlist::{AllowlistRefreshHandle, IpAllowlist};
pub use rate_limit::RateLimiter;
pub use routes::build_router;
pub use server::{serve, start_api_server};

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::secrets::{SecretResolver, SecretString};

/// Shared state for handlers and middleware.
#[derive(Clone)]
pub struct ApiState {
    pub resolver: Arc<SecretResolver>,
    pub api_key: Arc<SecretString>,
    pub allowlist: Arc<IpAllowlist>,
    pub rate_limiter: RateLimiter,
    pub metrics: Option<PrometheusHandle>,
    pub trust_forwarded_for: bool,
    /// Include upstream error text in 502 bodies. Off in production.
    pub expose_error_detail: bool,
    pub cors_allowed_origins: Arc<Vec<String>>,
    pub request_timeout: Duration,
}

impl ApiState {
    pub fn from_config(
        config: &AppConfig,
        resolver: Arc<SecretResolver>,
        allowlist: Arc<IpAllowlist>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            resolver,
            api_key: Arc::new(config.security.api_key.clone()),
            allowlist,
            rate_limiter: RateLimiter::per_minute(config.security.rate_limit_per_minute),
            metrics,
            trust_forwarded_for: config.security.trust_forwarded_for,
            expose_error_detail: !config.server.environment.is_production(),
            cors_allowed_origins: Arc::new(config.security.cors_allowed_origins.clone()),
            request_timeout: config.server.request_timeout,
        }
    }
}
