//! # Metrics Collection
//!
//! Prometheus recorder for the counters emitted by the secret resolution path
//! and the HTTP layer. The rendered exposition is served on `/metrics` by the
//! API router when metrics are enabled.

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

/// Install the global Prometheus recorder and describe our counters.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .add_global_label("service", &config.service_name)
        .install_recorder()
        .map_err(|e| Error::config(format!("Failed to initialize metrics recorder: {}", e)))?;

    describe_metrics();
    info!(service_name = %config.service_name, "Prometheus metrics recorder installed");
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("secret_cache_hits_total", Unit::Count, "Secret lookups served from cache");
    describe_counter!(
        "secret_cache_misses_total",
        Unit::Count,
        "Secret lookups that missed the cache or found an expired entry"
    );
    describe_counter!(
        "secret_upstream_requests_total",
        Unit::Count,
        "Lookups sent to the vault, labelled by outcome"
    );
    describe_counter!(
        "vault_token_refreshes_total",
        Unit::Count,
        "Client-credentials exchanges, labelled by outcome"
    );
    describe_counter!("http_requests_total", Unit::Count, "HTTP requests by route and status");
    describe_counter!(
        "http_requests_rejected_total",
        Unit::Count,
        "Requests rejected by authentication, allowlist or rate limit"
    );
}
