use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use vaultwarden_api::{
    api::{
        build_router,
        ip_allowlist::{github_http_client, GITHUB_META_URL},
        start_api_server, ApiState, IpAllowlist,
    },
    config::AppConfig,
    observability::{init_observability, log_config_info},
    secrets::ConnectedResolver,
    APP_NAME, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let metrics = init_observability(&config.observability)
        .context("failed to initialize observability")?;

    info!(app_name = APP_NAME, version = VERSION, "Starting credential proxy");
    log_config_info(&config);
    if !config.server.environment.is_production() {
        warn!("Running in development mode; upstream error detail is returned to callers");
    }

    let settings = config.vault.resolver_settings()?;
    let connected =
        ConnectedResolver::connect(settings).await.context("failed to connect to the vault")?;
    info!(source = connected.resolver.source_type(), "Secret resolver ready");

    let allowlist = Arc::new(IpAllowlist::new(
        config.security.allowed_ips.clone(),
        config.security.enable_github_ip_ranges,
    ));
    let github_refresh = if config.security.enable_github_ip_ranges {
        let http = github_http_client().context("failed to build GitHub HTTP client")?;
        if let Err(e) = allowlist.refresh_github_ranges(&http, GITHUB_META_URL).await {
            error!(error = %e, "Initial GitHub IP range fetch failed; GitHub runners are denied until the next refresh");
        }
        Some(allowlist.clone().spawn_github_refresh(
            http,
            GITHUB_META_URL.to_string(),
            config.security.github_ip_refresh,
        ))
    } else {
        None
    };

    let state = ApiState::from_config(&config, connected.resolver.clone(), allowlist, metrics);
    let router = build_router(state);

    let served = start_api_server(&config.server, router).await;

    if let Some(refresh) = github_refresh {
        refresh.shutdown().await;
    }
    connected.shutdown().await;

    served.context("API server failed")?;
    info!("Shutdown complete");
    Ok(())
}
