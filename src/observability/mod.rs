//! # Observability Infrastructure
//!
//! Structured logging through `tracing` and optional Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::init_metrics;

use ::metrics_exporter_prometheus::PrometheusHandle;
use ::tracing::info;

use crate::config::ObservabilityConfig;
use crate::errors::Result;

/// Initialize logging and, if enabled, the metrics recorder.
///
/// Returns the Prometheus handle used to render `/metrics`.
pub fn init_observability(config: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    init_logging(config)?;

    let metrics = if config.enable_metrics { Some(init_metrics(config)?) } else { None };

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = config.enable_metrics,
        "Observability initialized successfully"
    );

    Ok(metrics)
}
