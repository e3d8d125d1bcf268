//! # Configuration Management
//!
//! Configuration comes from environment variables (optionally seeded from a
//! `.env` file by the binary). Raw values are collected with the `config`
//! crate, parsed into the typed structs in [`settings`] and validated with
//! `validator` before anything else starts.
//!
//! Durations use humantime syntax: `30s`, `5m`, `6h`, `0` to disable.

pub mod settings;

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::secrets::SecretString;

pub use settings::{
    AppConfig, AuthMode, Environment, ObservabilityConfig, SecurityConfig, ServerConfig,
    VaultConfig,
};

/// Raw string values as they arrive from the environment.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    api_port: Option<String>,
    api_bind_address: Option<String>,
    environment: Option<String>,
    api_key: Option<String>,
    allowed_ips: Option<String>,
    enable_github_ip_ranges: Option<String>,
    github_ip_refresh: Option<String>,
    trust_forwarded_for: Option<String>,
    rate_limit_per_minute: Option<String>,
    read_timeout: Option<String>,
    write_timeout: Option<String>,
    cors_allowed_origins: Option<String>,
    vaultwarden_url: Option<String>,
    vaultwarden_auth_mode: Option<String>,
    vaultwarden_client_id: Option<String>,
    vaultwarden_client_secret: Option<String>,
    vaultwarden_access_token: Option<String>,
    vaultwarden_master_password: Option<String>,
    vaultwarden_email: Option<String>,
    vaultwarden_session_refresh: Option<String>,
    bw_cli_path: Option<String>,
    cache_ttl: Option<String>,
    log_level: Option<String>,
    log_format: Option<String>,
    enable_metrics: Option<String>,
}

impl AppConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let raw: RawSettings = config::Config::builder()
            .add_source(config::Environment::default().ignore_empty(true).source(vars))
            .build()?
            .try_deserialize()?;

        let config = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let read_timeout = parse_duration("READ_TIMEOUT", raw.read_timeout, Duration::from_secs(10))?;
        let write_timeout =
            parse_duration("WRITE_TIMEOUT", raw.write_timeout, Duration::from_secs(10))?;

        let server = ServerConfig {
            bind_address: raw.api_bind_address.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_value("API_PORT", raw.api_port, 8080u16)?,
            request_timeout: read_timeout.max(write_timeout),
            environment: Environment::parse(raw.environment.as_deref().unwrap_or("development")),
        };

        let security = SecurityConfig {
            api_key: SecretString::new(
                raw.api_key.ok_or_else(|| Error::config("API_KEY is required"))?,
            ),
            allowed_ips: parse_ip_list(raw.allowed_ips.as_deref().unwrap_or(""))?,
            enable_github_ip_ranges: parse_bool(
                "ENABLE_GITHUB_IP_RANGES",
                raw.enable_github_ip_ranges,
                false,
            )?,
            github_ip_refresh: parse_duration(
                "GITHUB_IP_REFRESH",
                raw.github_ip_refresh,
                Duration::from_secs(24 * 3600),
            )?,
            trust_forwarded_for: parse_bool("TRUST_FORWARDED_FOR", raw.trust_forwarded_for, false)?,
            rate_limit_per_minute: parse_value("RATE_LIMIT_PER_MINUTE", raw.rate_limit_per_minute, 30u32)?,
            cors_allowed_origins: split_list(
                raw.cors_allowed_origins.as_deref().unwrap_or("http://localhost:3000"),
            ),
        };

        let base_url = raw
            .vaultwarden_url
            .ok_or_else(|| Error::config("VAULTWARDEN_URL is required"))?
            .trim_end_matches('/')
            .to_string();

        let vault = VaultConfig {
            base_url,
            auth_mode: AuthMode::parse(raw.vaultwarden_auth_mode.as_deref().unwrap_or("auto"))?,
            client_id: raw.vaultwarden_client_id,
            client_secret: raw.vaultwarden_client_secret.map(SecretString::new),
            access_token: raw.vaultwarden_access_token.map(SecretString::new),
            master_password: raw.vaultwarden_master_password.map(SecretString::new),
            email: raw.vaultwarden_email,
            cli_path: raw.bw_cli_path.unwrap_or_else(|| "bw".to_string()),
            session_refresh: parse_duration(
                "VAULTWARDEN_SESSION_REFRESH",
                raw.vaultwarden_session_refresh,
                Duration::from_secs(6 * 3600),
            )?,
            cache_ttl: parse_duration("CACHE_TTL", raw.cache_ttl, Duration::from_secs(300))?,
        };

        let observability = ObservabilityConfig {
            log_level: raw.log_level.unwrap_or_else(|| "info".to_string()),
            json_logging: raw.log_format.as_deref().is_some_and(|f| f.eq_ignore_ascii_case("json")),
            enable_metrics: parse_bool("ENABLE_METRICS", raw.enable_metrics, false)?,
            ..ObservabilityConfig::default()
        };

        Ok(Self { server, security, vault, observability })
    }
}

fn parse_value<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, v, e))),
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::config(format!("Invalid {} '{}': expected true or false", key, v))),
        },
    }
}

/// Parse a humantime duration; a bare `0` means zero.
pub fn parse_duration(key: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value.as_deref().map(str::trim) {
        None => Ok(default),
        Some("0") => Ok(Duration::ZERO),
        Some(v) => humantime::parse_duration(v)
            .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, v, e))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Parse a comma-separated list of IP addresses and CIDR blocks.
///
/// Bare addresses become host networks (`/32` or `/128`).
pub fn parse_ip_list(value: &str) -> Result<Vec<IpNetwork>> {
    split_list(value)
        .into_iter()
        .map(|entry| {
            entry
                .parse::<IpNetwork>()
                .map_err(|_| Error::config(format!("Invalid IP or CIDR in ALLOWED_IPS: '{}'", entry)))
        })
        .collect()
}
