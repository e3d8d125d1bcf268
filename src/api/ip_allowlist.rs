//! Source-address allowlist.
//!
//! Holds a static list of networks from configuration plus, optionally, the
//! GitHub Actions runner ranges published at `https://api.github.com/meta`.
//! The GitHub set is replaced wholesale on each successful refresh; a failed
//! refresh keeps the previous set.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::ApiError;
use super::middleware::client_ip;
use super::ApiState;
use crate::errors::{Error, Result};
use crate::secrets::backends::http_client_with_timeout;

pub const GITHUB_META_URL: &str = "https://api.github.com/meta";
pub const GITHUB_META_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct GithubMeta {
    #[serde(default)]
    actions: Vec<String>,
}

/// Allowed client networks.
#[derive(Debug)]
pub struct IpAllowlist {
    static_entries: Vec<IpNetwork>,
    github_enabled: bool,
    github_ranges: RwLock<Vec<IpNetwork>>,
}

impl IpAllowlist {
    pub fn new(static_entries: Vec<IpNetwork>, github_enabled: bool) -> Self {
        Self { static_entries, github_enabled, github_ranges: RwLock::new(Vec::new()) }
    }

    /// An allowlist that admits every client.
    pub fn allow_all() -> Self {
        Self::new(Vec::new(), false)
    }

    /// Whether any restriction is configured.
    ///
    /// Enabling GitHub ranges counts as a restriction even before the first
    /// successful fetch, so a failed fetch does not open the service up.
    pub fn is_restricted(&self) -> bool {
        !self.static_entries.is_empty() || self.github_enabled
    }

    pub fn github_enabled(&self) -> bool {
        self.github_enabled
    }

    pub fn github_range_count(&self) -> usize {
        self.github_ranges.read().map(|ranges| ranges.len()).unwrap_or(0)
    }

    /// IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) are matched as IPv4.
    pub fn is_allowed(&self, ip: &IpAddr) -> bool {
        if !self.is_restricted() {
            return true;
        }

        let ip = ip.to_canonical();
        if self.static_entries.iter().any(|net| net.contains(ip)) {
            return true;
        }

        match self.github_ranges.read() {
            Ok(ranges) => ranges.iter().any(|net| net.contains(ip)),
            Err(_) => false,
        }
    }

    pub fn replace_github_ranges(&self, ranges: Vec<IpNetwork>) {
        if let Ok(mut guard) = self.github_ranges.write() {
            *guard = ranges;
        }
    }

    /// Fetch the GitHub ranges once and swap them in.
    pub async fn refresh_github_ranges(&self, http: &reqwest::Client, url: &str) -> Result<usize> {
        let ranges = fetch_github_actions_ranges(http, url).await?;
        let count = ranges.len();
        self.replace_github_ranges(ranges);
        info!(ranges = count, "Loaded GitHub Actions IP ranges");
        Ok(count)
    }

    /// Refresh the GitHub ranges every `interval` until shut down.
    pub fn spawn_github_refresh(
        self: Arc<Self>,
        http: reqwest::Client,
        url: String,
        interval: Duration,
    ) -> AllowlistRefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh_github_ranges(&http, &url).await {
                            error!(error = %err, "GitHub IP range refresh failed, keeping previous ranges");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        AllowlistRefreshHandle { shutdown_tx, handle }
    }
}

/// Handle for the GitHub range refresh task.
pub struct AllowlistRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl AllowlistRefreshHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        debug!("GitHub IP range refresh task stopped");
    }
}

/// Client used for the GitHub meta endpoint.
pub fn github_http_client() -> Result<reqwest::Client> {
    Ok(http_client_with_timeout(GITHUB_META_TIMEOUT)?)
}

/// Download and parse the `actions` ranges. Unparsable entries are skipped.
pub async fn fetch_github_actions_ranges(http: &reqwest::Client, url: &str) -> Result<Vec<IpNetwork>> {
    let response = http
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| Error::transport(format!("GitHub meta request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::transport(format!("GitHub meta returned status {}", status.as_u16())));
    }

    let meta: GithubMeta = response
        .json()
        .await
        .map_err(|e| Error::transport(format!("GitHub meta response invalid: {}", e)))?;

    let mut ranges = Vec::with_capacity(meta.actions.len());
    for entry in meta.actions {
        match entry.parse::<IpNetwork>() {
            Ok(net) => ranges.push(net),
            Err(_) => warn!(entry = %entry, "Skipping unparsable GitHub Actions range"),
        }
    }
    Ok(ranges)
}

/// Reject clients outside the allowlist with 403.
pub async fn enforce_allowlist(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    if !state.allowlist.is_restricted() {
        return Ok(next.run(request).await);
    }

    match client_ip(&request, state.trust_forwarded_for) {
        Some(ip) if state.allowlist.is_allowed(&ip) => {
            debug!(client_ip = %ip, "Client IP allowed");
            Ok(next.run(request).await)
        }
        ip => {
            warn!(
                client_ip = ?ip,
                method = %request.method(),
                path = %request.uri().path(),
                "Client IP not in allowlist"
            );
            metrics::counter!("http_requests_rejected_total", "reason" => "ip_allowlist")
                .increment(1);
            Err(ApiError::forbidden("access denied: IP not whitelisted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_ip_list;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_allowlist_allows_everyone() {
        let allowlist = IpAllowlist::allow_all();
        assert!(!allowlist.is_restricted());
        assert!(allowlist.is_allowed(&ip("203.0.113.9")));
    }

    #[test]
    fn test_static_ips_and_cidrs() {
        let entries = parse_ip_list("10.0.0.0/8, 192.168.1.5, 2001:db8::/32").unwrap();
        let allowlist = IpAllowlist::new(entries, false);

        assert!(allowlist.is_allowed(&ip("10.20.30.40")));
        assert!(allowlist.is_allowed(&ip("192.168.1.5")));
        assert!(allowlist.is_allowed(&ip("2001:db8::1")));
        assert!(!allowlist.is_allowed(&ip("192.168.1.6")));
        assert!(!allowlist.is_allowed(&ip("8.8.8.8")));
    }

    #[test]
    fn test_ipv4_mapped_peer_matches_ipv4_entries() {
        let entries = parse_ip_list("10.0.0.0/8").unwrap();
        let allowlist = IpAllowlist::new(entries, false);

        assert!(allowlist.is_allowed(&ip("::ffff:10.0.0.5")));
        assert!(!allowlist.is_allowed(&ip("::ffff:192.168.0.1")));
    }

    #[test]
    fn test_github_enabled_without_ranges_denies() {
        let allowlist = IpAllowlist::new(Vec::new(), true);
        assert!(allowlist.is_restricted());
        assert!(!allowlist.is_allowed(&ip("140.82.112.1")));

        allowlist.replace_github_ranges(vec!["140.82.112.0/20".parse().unwrap()]);
        assert!(allowlist.is_allowed(&ip("140.82.112.1")));
        assert_eq!(allowlist.github_range_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_github_ranges_skips_bad_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "actions": ["4.148.0.0/16", "not-a-cidr", "2a01:111:f403::/48"],
                "hooks": ["192.30.252.0/22"]
            })))
            .mount(&server)
            .await;

        let allowlist = IpAllowlist::new(Vec::new(), true);
        let count = allowlist
            .refresh_github_ranges(&github_http_client().unwrap(), &format!("{}/meta", server.uri()))
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert!(allowlist.is_allowed(&ip("4.148.1.2")));
        assert!(!allowlist.is_allowed(&ip("192.30.252.1")));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_ranges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let allowlist = IpAllowlist::new(Vec::new(), true);
        allowlist.replace_github_ranges(vec!["4.148.0.0/16".parse().unwrap()]);

        let result = allowlist
            .refresh_github_ranges(&github_http_client().unwrap(), &format!("{}/meta", server.uri()))
            .await;

        assert!(result.is_err());
        assert!(allowlist.is_allowed(&ip("4.148.1.2")));
    }
}
