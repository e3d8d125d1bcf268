//! Axum middleware for caller authentication and request tracking.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::{field, warn, Instrument};

use super::error::ApiError;
use super::ApiState;
use crate::request_span;

/// Determine the caller's address.
///
/// With `trust_forwarded_for` the first `X-Forwarded-For` hop wins; otherwise
/// the socket peer recorded by `into_make_service_with_connect_info` is used.
/// Returns `None` when no usable address is available.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        if let Some(forwarded) =
            request.headers().get("x-forwarded-for").and_then(|value| value.to_str().ok())
        {
            let first = forwarded.split(',').next().unwrap_or_default().trim();
            return first.parse().ok();
        }
    }

    request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip())
}

/// Require `Authorization: Bearer <API_KEY>`.
///
/// The scheme is matched case-insensitively and the key compared in constant
/// time.
pub async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request.headers().get(AUTHORIZATION);
    let result = match header {
        None => Err("missing authorization header"),
        Some(value) if value.is_empty() => Err("missing authorization header"),
        Some(value) => match value.to_str().ok().and_then(|v| v.split_once(' ')) {
            Some((scheme, key)) if scheme.eq_ignore_ascii_case("bearer") => {
                let matches: bool =
                    key.as_bytes().ct_eq(state.api_key.expose_secret().as_bytes()).into();
                if matches {
                    Ok(())
                } else {
                    Err("invalid api key")
                }
            }
            _ => Err("invalid authorization header format"),
        },
    };

    match result {
        Ok(()) => Ok(next.run(request).await),
        Err(reason) => {
            warn!(
                client_ip = ?client_ip(&request, state.trust_forwarded_for),
                path = %request.uri().path(),
                reason,
                "Authentication failed"
            );
            metrics::counter!("http_requests_rejected_total", "reason" => "auth").increment(1);
            Err(ApiError::unauthorized(reason))
        }
    }
}

/// Wrap each request in an `http_request` span and count it by route and status.
pub async fn track_requests(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let client = client_ip(&request, state.trust_forwarded_for);
    let span = request_span!(method, route, client_ip = field::debug(client));

    let response = next.run(request).instrument(span.clone()).await;

    let status = response.status().as_u16();
    span.record("status", status);
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(forwarded: Option<&str>, peer: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/secret/A");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            request.extensions_mut().insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        request
    }

    #[test]
    fn test_client_ip_uses_first_forwarded_hop_when_trusted() {
        let request = request_with(Some(" 203.0.113.7 , 10.0.0.1"), Some("10.0.0.1:5000"));
        assert_eq!(client_ip(&request, true), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_ignores_forwarded_when_untrusted() {
        let request = request_with(Some("203.0.113.7"), Some("10.0.0.1:5000"));
        assert_eq!(client_ip(&request, false), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_unparsable_forwarded_hop_is_none() {
        let request = request_with(Some("not-an-ip"), Some("10.0.0.1:5000"));
        assert_eq!(client_ip(&request, true), None);
    }

    #[test]
    fn test_no_peer_info_is_none() {
        let request = request_with(None, None);
        assert_eq!(client_ip(&request, true), None);
    }
}
