//! # vaultwarden-api
//!
//! An authenticated HTTP proxy that resolves named secrets from a self-hosted
//! Vaultwarden (Bitwarden-compatible) server. Callers present a static API key
//! and receive the value stored in the vault entry of the same name.
//!
//! ## Architecture
//!
//! ```text
//! HTTP API (axum) → SecretResolver → SecretCache
//!                         ↓
//!                   SecretSource ─┬─ ApiCipherSource → TokenAuthority → /identity/connect/token
//!                                 └─ CliCipherSource → bw CLI (session bootstrap + refresh)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use vaultwarden_api::{config::AppConfig, secrets::ConnectedResolver, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let connected = ConnectedResolver::connect(config.vault.resolver_settings()?).await?;
//!     let value = connected.resolver.resolve("DB_URL").await?;
//!     println!("{} bytes", value.len());
//!     connected.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod observability;
pub mod secrets;

// Re-export commonly used types and traits
pub use config::{AppConfig, Environment};
pub use errors::{Error, Result};
pub use observability::init_observability;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
