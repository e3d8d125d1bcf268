//! Validated configuration structs.

use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::Serialize;
use validator::Validate;

use crate::errors::{Error, Result};
use crate::secrets::backends::{ClientCredentials, LoginMethod};
use crate::secrets::{AuthStrategy, ResolverSettings, SecretString};

/// Minimum length accepted for the caller API key.
pub const MIN_API_KEY_LEN: usize = 32;

/// Top-level application configuration
#[derive(Debug, Clone, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub security: SecurityConfig,

    #[validate(nested)]
    pub vault: VaultConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.security.api_key.len() < MIN_API_KEY_LEN {
            return Err(Error::config(format!(
                "API_KEY must be at least {} characters long",
                MIN_API_KEY_LEN
            )));
        }

        if !(self.vault.base_url.starts_with("http://") || self.vault.base_url.starts_with("https://")) {
            return Err(Error::config("VAULTWARDEN_URL must use http:// or https://"));
        }

        if self.server.request_timeout.is_zero() {
            return Err(Error::config("READ_TIMEOUT and WRITE_TIMEOUT cannot both be zero"));
        }

        if self.security.enable_github_ip_ranges && self.security.github_ip_refresh.is_zero() {
            return Err(Error::config("GITHUB_IP_REFRESH must be greater than zero"));
        }

        // Fails early if the credentials cannot produce a strategy.
        self.vault.auth_strategy()?;
        Ok(())
    }
}

/// Deployment environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1, message = "Bind address cannot be empty"))]
    pub bind_address: String,

    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Upper bound on handling a single request.
    pub request_timeout: Duration,

    pub environment: Environment,
}

impl ServerConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(10),
            environment: Environment::Development,
        }
    }
}

/// Caller authentication and network filtering
#[derive(Debug, Clone, Validate)]
pub struct SecurityConfig {
    pub api_key: SecretString,

    /// Static allowlist. Empty together with GitHub ranges disabled means allow all.
    pub allowed_ips: Vec<IpNetwork>,

    pub enable_github_ip_ranges: bool,

    pub github_ip_refresh: Duration,

    /// Use the first `X-Forwarded-For` hop as the client address.
    pub trust_forwarded_for: bool,

    #[validate(range(min = 1, max = 100000, message = "Rate limit must be between 1 and 100000"))]
    pub rate_limit_per_minute: u32,

    #[validate(length(min = 1, message = "At least one CORS origin is required"))]
    pub cors_allowed_origins: Vec<String>,
}

/// Which lookup strategy the operator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// API when client credentials are present, CLI otherwise.
    Auto,
    Api,
    Cli,
}

impl AuthMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "api" => Ok(Self::Api),
            "cli" => Ok(Self::Cli),
            other => Err(Error::config(format!(
                "VAULTWARDEN_AUTH_MODE must be one of auto, api, cli (got '{}')",
                other
            ))),
        }
    }
}

/// Upstream vault configuration
#[derive(Debug, Clone, Validate)]
pub struct VaultConfig {
    #[validate(url(message = "VAULTWARDEN_URL must be a valid URL"))]
    pub base_url: String,

    pub auth_mode: AuthMode,

    pub client_id: Option<String>,

    pub client_secret: Option<SecretString>,

    /// Pre-obtained `bw` session key.
    pub access_token: Option<SecretString>,

    pub master_password: Option<SecretString>,

    pub email: Option<String>,

    #[validate(length(min = 1, message = "BW_CLI_PATH cannot be empty"))]
    pub cli_path: String,

    pub session_refresh: Duration,

    pub cache_ttl: Duration,
}

impl VaultConfig {
    fn client_credentials(&self) -> Option<ClientCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(ClientCredentials::new(id.clone(), secret.clone())),
            _ => None,
        }
    }

    /// Decide how the resolver authenticates.
    pub fn auth_strategy(&self) -> Result<AuthStrategy> {
        let credentials = self.client_credentials();

        match (self.auth_mode, credentials) {
            (AuthMode::Api, None) => Err(Error::config(
                "VAULTWARDEN_CLIENT_ID and VAULTWARDEN_CLIENT_SECRET are required in api mode",
            )),
            (AuthMode::Api, Some(credentials)) | (AuthMode::Auto, Some(credentials)) => {
                Ok(AuthStrategy::Api(credentials))
            }
            (AuthMode::Cli, credentials) | (AuthMode::Auto, credentials @ None) => {
                self.cli_strategy(credentials)
            }
        }
    }

    fn cli_strategy(&self, credentials: Option<ClientCredentials>) -> Result<AuthStrategy> {
        if let Some(session) = &self.access_token {
            return Ok(AuthStrategy::CliSession(session.clone()));
        }

        let master_password = self.master_password.clone().ok_or_else(|| {
            Error::config(
                "CLI mode needs VAULTWARDEN_ACCESS_TOKEN or VAULTWARDEN_MASTER_PASSWORD",
            )
        })?;

        let login = match (credentials, &self.email) {
            (Some(credentials), _) => LoginMethod::ApiKey(credentials),
            (None, Some(email)) => LoginMethod::Password { email: email.clone() },
            (None, None) => {
                return Err(Error::config(
                    "CLI bootstrap needs VAULTWARDEN_EMAIL or VAULTWARDEN_CLIENT_ID/SECRET to log in",
                ))
            }
        };

        Ok(AuthStrategy::CliBootstrap { login, master_password })
    }

    pub fn resolver_settings(&self) -> Result<ResolverSettings> {
        Ok(ResolverSettings {
            base_url: self.base_url.clone(),
            strategy: self.auth_strategy()?,
            cache_ttl: self.cache_ttl,
            cli_path: self.cli_path.clone(),
            session_refresh: self.session_refresh,
        })
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Validate)]
pub struct ObservabilityConfig {
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level or env-filter directive (e.g. `info,vaultwarden_api=debug`)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Expose Prometheus metrics on `/metrics`
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: crate::APP_NAME.to_string(),
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
        }
    }
}
