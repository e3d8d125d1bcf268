//! Client-credentials token lifecycle for the vault's identity endpoint.
//!
//! The authority keeps at most one bearer token and refreshes it when it is
//! missing or within [`TOKEN_EXPIRY_MARGIN`] of its upstream expiry. Refresh is
//! single-flight: callers that arrive while an exchange is running wait on the
//! refresh gate and reuse its result instead of starting their own.

use std::sync::RwLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

/// Tokens are treated as stale this long before the upstream says they expire.
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Device type the vault expects from non-browser clients.
pub const DEVICE_TYPE: &str = "14";

const DEVICE_NAME: &str = "vaultwarden-api";
const TOKEN_PATH: &str = "/identity/connect/token";

/// A bearer credential and the instant after which it must not be used.
#[derive(Clone)]
pub struct BearerToken {
    token: SecretString,
    expires_at: Instant,
}

impl BearerToken {
    /// Build a token from an exchange response received at `issued_at`.
    pub fn from_grant(token: SecretString, expires_in: Duration, issued_at: Instant) -> Self {
        Self { token, expires_at: issued_at + expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN) }
    }

    /// Whether the token may still be used at `now`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn secret(&self) -> &SecretString {
        &self.token
    }
}

/// OAuth client id/secret pair issued by the vault for API access.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self { client_id: client_id.into(), client_secret }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    token_type: Option<String>,
}

/// Obtains and caches bearer tokens for the vault API.
pub struct TokenAuthority {
    http: reqwest::Client,
    token_url: String,
    credentials: ClientCredentials,
    device_identifier: String,
    state: RwLock<Option<BearerToken>>,
    refresh_gate: Mutex<()>,
}

impl TokenAuthority {
    /// Create an authority for the vault at `base_url`.
    ///
    /// `http` should carry the request timeout; the service builds it with 30 s.
    pub fn new(http: reqwest::Client, base_url: &str, credentials: ClientCredentials) -> Self {
        let device_identifier = device_identifier(&credentials.client_id);
        Self {
            http,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH),
            credentials,
            device_identifier,
            state: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Return a usable bearer token, exchanging credentials if needed.
    pub async fn token(&self) -> Result<SecretString> {
        if let Some(token) = self.current() {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;

        // Another caller may have refreshed while we waited on the gate.
        if let Some(token) = self.current() {
            debug!("Reusing token obtained by concurrent refresh");
            return Ok(token);
        }

        let fresh = self.exchange().await?;
        let token = fresh.secret().clone();
        if let Ok(mut state) = self.state.write() {
            *state = Some(fresh);
        }
        Ok(token)
    }

    /// Forget the current token so the next call performs a fresh exchange.
    pub fn invalidate(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = None;
        }
    }

    fn current(&self) -> Option<SecretString> {
        let state = self.state.read().ok()?;
        state
            .as_ref()
            .filter(|token| token.is_fresh_at(Instant::now()))
            .map(|token| token.secret().clone())
    }

    async fn exchange(&self) -> Result<BearerToken> {
        let issued_at = Instant::now();
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", "api"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
            ("deviceIdentifier", self.device_identifier.as_str()),
            ("deviceType", DEVICE_TYPE),
            ("deviceName", DEVICE_NAME),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                let err = SecretsError::from_reqwest(&e);
                warn!(error = %err, "Token exchange request failed");
                err
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            metrics::counter!("vault_token_refreshes_total", "outcome" => "rejected").increment(1);
            warn!(status = status.as_u16(), "Vault rejected client credentials");
            return Err(SecretsError::auth_failure_status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|_| SecretsError::invalid_response("token response is not valid JSON"))?;

        if body.access_token.is_empty() {
            return Err(SecretsError::invalid_response("token response has empty access_token"));
        }

        metrics::counter!("vault_token_refreshes_total", "outcome" => "ok").increment(1);
        info!(
            expires_in = body.expires_in,
            token_type = body.token_type.as_deref().unwrap_or("unknown"),
            "Obtained vault access token"
        );

        Ok(BearerToken::from_grant(
            SecretString::new(body.access_token),
            Duration::from_secs(body.expires_in),
            issued_at,
        ))
    }
}

/// Stable per-client device id: base64 of the first 16 bytes of SHA-256(client_id).
pub fn device_identifier(client_id: &str) -> String {
    let digest = Sha256::digest(client_id.as_bytes());
    STANDARD.encode(&digest[..16])
}
