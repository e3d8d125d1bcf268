//! HTTP handlers.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use super::error::ApiError;
use super::validation::is_valid_secret_name;
use super::ApiState;
use crate::APP_NAME;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Serialize)]
pub struct SecretResponse {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Liveness probe. Public.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", service: APP_NAME })
}

/// `GET /secret/` with nothing after the slash.
pub async fn missing_secret_name_handler() -> ApiError {
    warn!("Secret name not provided");
    ApiError::bad_request("secret name is required")
}

/// `GET /secret/{*name}`: resolve one secret by entry name.
pub async fn get_secret_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<SecretResponse>, ApiError> {
    if name.is_empty() {
        return Err(missing_secret_name_handler().await);
    }

    if !is_valid_secret_name(&name) {
        warn!(name_len = name.len(), "Invalid secret name rejected");
        return Err(ApiError::bad_request("invalid secret name format"));
    }

    match state.resolver.resolve(&name).await {
        Ok(value) => {
            Ok(Json(SecretResponse { name, value: value.expose_secret().to_string() }))
        }
        Err(err) => {
            warn!(secret = %name, error = %err, kind = err.kind(), "Failed to resolve secret");
            Err(ApiError::from_secrets(&err, state.expose_error_detail))
        }
    }
}

/// `POST /refresh`: drop every cached value and ask the vault to sync.
///
/// The sync is best-effort; a failure is logged and the response still
/// reports success since the cache is already empty.
pub async fn refresh_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    let cleared = state.resolver.invalidate_cache();
    info!(cleared, "Cache refresh requested");

    if let Err(err) = state.resolver.sync_upstream().await {
        warn!(error = %err, "Upstream sync after cache refresh failed");
    }

    Json(StatusResponse { status: "ok", message: "cache cleared successfully" })
}

/// Prometheus exposition. Only routed when metrics are enabled.
pub async fn metrics_handler(State(state): State<ApiState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::NotFound("metrics disabled".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let Json(response) = health_handler().await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.service, "vaultwarden-api");
    }
}
