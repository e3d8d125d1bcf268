//! Upstream lookup strategies for the Vaultwarden server.
//!
//! - **API**: client-credentials token from `/identity/connect/token`, then
//!   `GET /api/ciphers` and a local name match.
//! - **CLI**: the `bw` binary with an unlocked session key, optionally
//!   bootstrapped at startup.

pub mod api;
pub mod cipher;
pub mod cli;
pub mod token;

use std::time::Duration;

use crate::secrets::error::{Result, SecretsError};

pub use api::ApiCipherSource;
pub use cipher::{EntryType, VaultEntry};
pub use cli::{BwCli, CliCipherSource, LoginMethod, SessionBootstrap, SessionRefreshHandle, VaultCli};
pub use token::{BearerToken, ClientCredentials, TokenAuthority};

/// Timeout applied to every request against the vault HTTP API.
pub const UPSTREAM_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for the vault API.
pub fn vault_http_client() -> Result<reqwest::Client> {
    http_client_with_timeout(UPSTREAM_HTTP_TIMEOUT)
}

/// Build an HTTP client whose every request is bounded by `timeout`.
pub fn http_client_with_timeout(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SecretsError::transport(format!("failed to build HTTP client: {}", e)))
}
