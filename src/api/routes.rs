use std::any::Any;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, warn};

use super::{
    error::ApiError,
    handlers::{
        get_secret_handler, health_handler, metrics_handler, missing_secret_name_handler,
        refresh_handler,
    },
    ip_allowlist::enforce_allowlist,
    middleware::{require_api_key, track_requests},
    rate_limit::enforce_rate_limit,
    ApiState,
};

/// Build the application router.
///
/// Outermost first: panic recovery, tracing, security headers, CORS,
/// compression, timeout, request metrics, rate limit. Protected routes add
/// the IP allowlist and then API-key authentication.
pub fn build_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/secret/", get(missing_secret_name_handler))
        .route("/secret/{*name}", get(get_secret_handler))
        .route("/refresh", post(refresh_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), enforce_allowlist));

    let mut public = Router::new().route("/health", get(health_handler));
    if state.metrics.is_some() {
        public = public.route("/metrics", get(metrics_handler));
    }

    let ambient = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors_layer(&state.cors_allowed_origins))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(state.request_timeout));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(ambient)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(false);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(values))
}

fn handle_panic(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("Request handler panicked");
    ApiError::internal("Internal Server Error").into_response()
}
