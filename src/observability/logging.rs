//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.
//!
//! Secret values, bearer tokens and CLI session keys are never recorded: they
//! travel as [`SecretString`](crate::secrets::SecretString), whose `Debug` and
//! `Display` both print `[REDACTED]`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Error, Result};

/// Create a tracing span for request tracking.
///
/// ```rust,ignore
/// let span = request_span!("GET", "/secret/DB_URL", client_ip = %ip);
/// ```
#[macro_export]
macro_rules! request_span {
    ($method:expr, $path:expr) => {
        tracing::info_span!(
            "http_request",
            method = %$method,
            path = %$path,
            request_id = %uuid::Uuid::new_v4(),
            status = tracing::field::Empty
        )
    };
    ($method:expr, $path:expr, $($field:tt)*) => {
        tracing::info_span!(
            "http_request",
            method = %$method,
            path = %$path,
            request_id = %uuid::Uuid::new_v4(),
            status = tracing::field::Empty,
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `log_level` accepts a bare level or a full env-filter directive. `RUST_LOG`,
/// when set, takes precedence.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry.with(fmt::layer().json().with_current_span(true).with_span_list(false)).try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(true)).try_init()
    };

    // A subscriber may already be installed (tests); that is not an error.
    if result.is_err() {
        tracing::debug!("Global tracing subscriber already set");
    }
    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        address = %config.server.socket_address(),
        environment = ?config.server.environment,
        vault_url = %config.vault.base_url,
        cache_ttl_secs = config.vault.cache_ttl.as_secs(),
        allowed_ips = config.security.allowed_ips.len(),
        github_ranges = config.security.enable_github_ip_ranges,
        rate_limit_per_minute = config.security.rate_limit_per_minute,
        metrics_enabled = config.observability.enable_metrics,
        "Credential proxy configuration"
    );
}
