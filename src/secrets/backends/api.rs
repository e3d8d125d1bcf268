//! Secret lookup through the vault's HTTP API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::cipher::CipherList;
use super::token::{TokenAuthority, DEVICE_TYPE};
use crate::secrets::client::{validate_lookup_name, SecretSource};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

const CIPHERS_PATH: &str = "/api/ciphers";

/// Looks secrets up by listing `/api/ciphers` with a client-credentials token.
pub struct ApiCipherSource {
    http: reqwest::Client,
    ciphers_url: String,
    tokens: Arc<TokenAuthority>,
}

impl ApiCipherSource {
    pub fn new(http: reqwest::Client, base_url: &str, tokens: Arc<TokenAuthority>) -> Self {
        Self { http, ciphers_url: format!("{}{}", base_url.trim_end_matches('/'), CIPHERS_PATH), tokens }
    }

    async fn list_ciphers(&self) -> Result<CipherList> {
        let token = self.tokens.token().await?;

        let response = self
            .http
            .get(&self.ciphers_url)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .header("Device-Type", DEVICE_TYPE)
            .send()
            .await
            .map_err(|e| SecretsError::from_reqwest(&e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            // Token was revoked or rotated upstream; next call exchanges again.
            self.tokens.invalidate();
        }
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Vault cipher listing failed");
            return Err(SecretsError::upstream(status.as_u16()));
        }

        response
            .json::<CipherList>()
            .await
            .map_err(|_| SecretsError::invalid_response("cipher list is not valid JSON"))
    }
}

#[async_trait]
impl SecretSource for ApiCipherSource {
    async fn fetch(&self, name: &str) -> Result<SecretString> {
        validate_lookup_name(name)?;
        let ciphers = self.list_ciphers().await?;

        let mut matches = ciphers.data.iter().filter(|entry| entry.name() == name);
        let entry = matches.next().ok_or_else(|| SecretsError::not_found(name))?;

        let duplicates = matches.count();
        if duplicates > 0 {
            warn!(
                secret_name = %name,
                chosen_id = %entry.id(),
                duplicates,
                "Multiple vault entries share this name, using the first"
            );
        }

        let value = entry.api_value().ok_or_else(|| SecretsError::no_value(name))?;
        debug!(secret_name = %name, entry_id = %entry.id(), "Extracted secret from vault entry");
        Ok(SecretString::new(value))
    }

    fn source_type(&self) -> &'static str {
        "api"
    }
}
