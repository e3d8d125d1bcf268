//! Router behaviour: authentication, validation, allowlist and rate limiting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use vaultwarden_api::api::{build_router, ApiState, IpAllowlist, RateLimiter};
use vaultwarden_api::config::parse_ip_list;
use vaultwarden_api::secrets::{
    Result as SecretsResult, SecretCache, SecretResolver, SecretSource, SecretString, SecretsError,
};

const API_KEY: &str = "test-api-key-0123456789abcdef0123";

struct StubSource {
    values: HashMap<String, String>,
    syncs: AtomicUsize,
}

#[async_trait]
impl SecretSource for StubSource {
    async fn fetch(&self, name: &str) -> SecretsResult<SecretString> {
        match name {
            "BROKEN" => Err(SecretsError::upstream(503)),
            "EMPTY" => Err(SecretsError::no_value(name)),
            _ => self
                .values
                .get(name)
                .map(|v| SecretString::new(v.clone()))
                .ok_or_else(|| SecretsError::not_found(name)),
        }
    }

    async fn sync(&self) -> SecretsResult<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "stub"
    }
}

struct Harness {
    router: Router,
    source: Arc<StubSource>,
    resolver: Arc<SecretResolver>,
}

fn harness_with(allowlist: IpAllowlist, rate_limit: u32, expose_error_detail: bool) -> Harness {
    let source = Arc::new(StubSource {
        values: HashMap::from([
            ("DB_URL".to_string(), "postgres://db".to_string()),
            ("prod/api-key".to_string(), "k-123".to_string()),
        ]),
        syncs: AtomicUsize::new(0),
    });
    let resolver = Arc::new(SecretResolver::new(
        source.clone(),
        Arc::new(SecretCache::new(Duration::from_secs(60))),
    ));

    let state = ApiState {
        resolver: resolver.clone(),
        api_key: Arc::new(SecretString::new(API_KEY)),
        allowlist: Arc::new(allowlist),
        rate_limiter: RateLimiter::per_minute(rate_limit),
        metrics: None,
        trust_forwarded_for: true,
        expose_error_detail,
        cors_allowed_origins: Arc::new(vec!["http://localhost:3000".to_string()]),
        request_timeout: Duration::from_secs(10),
    };

    Harness { router: build_router(state), source, resolver }
}

fn harness() -> Harness {
    harness_with(IpAllowlist::allow_all(), 1000, false)
}

fn request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = auth {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("192.0.2.10:40000".parse::<SocketAddr>().unwrap()));
    request
}

fn authed(method: &str, uri: &str) -> Request<Body> {
    request(method, uri, Some(&format!("Bearer {}", API_KEY)))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let (status, body) = send(&h.router, request("GET", "/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "vaultwarden-api");
}

#[tokio::test]
async fn security_headers_are_set() {
    let h = harness();
    let response = h.router.clone().oneshot(request("GET", "/health", None)).await.unwrap();

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

#[tokio::test]
async fn missing_or_malformed_authorization_is_rejected() {
    let h = harness();

    let (status, body) = send(&h.router, request("GET", "/secret/DB_URL", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "missing authorization header");

    let (status, body) = send(&h.router, request("GET", "/secret/DB_URL", Some(API_KEY))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid authorization header format");

    let (status, body) =
        send(&h.router, request("GET", "/secret/DB_URL", Some(&format!("Basic {}", API_KEY)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid authorization header format");

    let (status, body) =
        send(&h.router, request("GET", "/secret/DB_URL", Some("Bearer wrong-key"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid api key");
}

#[tokio::test]
async fn bearer_scheme_is_case_insensitive() {
    let h = harness();
    let (status, body) = send(
        &h.router,
        request("GET", "/secret/DB_URL", Some(&format!("bEaReR {}", API_KEY))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "postgres://db");
}

#[tokio::test]
async fn returns_secret_value() {
    let h = harness();

    let (status, body) = send(&h.router, authed("GET", "/secret/DB_URL")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "DB_URL");
    assert_eq!(body["value"], "postgres://db");

    let (status, body) = send(&h.router, authed("GET", "/secret/prod/api-key")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "prod/api-key");
    assert_eq!(body["value"], "k-123");
}

#[tokio::test]
async fn invalid_names_are_bad_requests() {
    let h = harness();

    let (status, body) = send(&h.router, authed("GET", "/secret/_leading")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid secret name format");

    let (status, _) = send(&h.router, authed("GET", "/secret/a..b")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&h.router, authed("GET", "/secret/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "secret name is required");
}

#[tokio::test]
async fn unknown_and_valueless_secrets_are_not_found() {
    let h = harness();

    for uri in ["/secret/NOPE", "/secret/EMPTY"] {
        let (status, body) = send(&h.router, authed("GET", uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "secret not found");
    }
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway_with_generic_message() {
    let h = harness();
    let (status, body) = send(&h.router, authed("GET", "/secret/BROKEN")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["message"], "upstream vault unavailable");
}

#[tokio::test]
async fn refresh_clears_cache_and_syncs() {
    let h = harness();

    send(&h.router, authed("GET", "/secret/DB_URL")).await;
    assert_eq!(h.resolver.cache().len(), 1);

    let (status, body) = send(&h.router, authed("POST", "/refresh")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "cache cleared successfully");
    assert!(h.resolver.cache().is_empty());
    assert_eq!(h.source.syncs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_requires_api_key() {
    let h = harness();
    let (status, _) = send(&h.router, request("POST", "/refresh", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn allowlist_blocks_unlisted_clients() {
    let allowlist = IpAllowlist::new(parse_ip_list("10.0.0.0/8").unwrap(), false);
    let h = harness_with(allowlist, 1000, false);

    let (status, body) = send(&h.router, authed("GET", "/secret/DB_URL")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "access denied: IP not whitelisted");

    let mut forwarded = authed("GET", "/secret/DB_URL");
    forwarded.headers_mut().insert("x-forwarded-for", "10.1.2.3, 192.0.2.10".parse().unwrap());
    let (status, _) = send(&h.router, forwarded).await;
    assert_eq!(status, StatusCode::OK);

    let mut garbage = authed("GET", "/secret/DB_URL");
    garbage.headers_mut().insert("x-forwarded-for", "not-an-ip".parse().unwrap());
    let (status, _) = send(&h.router, garbage).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Health stays reachable for probes.
    let (status, _) = send(&h.router, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let h = harness_with(IpAllowlist::allow_all(), 2, false);

    for _ in 0..2 {
        let (status, _) = send(&h.router, request("GET", "/health", None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = h.router.clone().oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let h = harness();
    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/secret/DB_URL")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap();

    let response = h.router.clone().oneshot(preflight).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}
