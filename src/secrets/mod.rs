//! Secret resolution against a self-hosted Vaultwarden server.
//!
//! # Architecture
//!
//! ```text
//! SecretResolver ──► SecretCache (TTL, sweeper)
//!        │
//!        └──► dyn SecretSource
//!                ├── ApiCipherSource ──► TokenAuthority ──► /identity/connect/token
//!                │                  └──► /api/ciphers
//!                └── CliCipherSource ──► bw get item / bw list items
//!                                   └──► SessionBootstrap (config, status, login, unlock)
//! ```
//!
//! The strategy is picked once from configuration through [`AuthStrategy`].
//! Every value leaves this module wrapped in [`SecretString`].
//!
//! # Example
//!
//! ```rust,ignore
//! use vaultwarden_api::secrets::{AuthStrategy, ConnectedResolver, ResolverSettings};
//!
//! let connected = ConnectedResolver::connect(settings).await?;
//! let value = connected.resolver.resolve("DB_URL").await?;
//! ```

pub mod backends;
pub mod cache;
pub mod client;
pub mod error;
pub mod resolver;
pub mod types;

pub use cache::SecretCache;
pub use client::{validate_lookup_name, SecretSource};
pub use error::{Result, SecretsError};
pub use resolver::{AuthStrategy, ConnectedResolver, ResolverSettings, SecretResolver};
pub use types::SecretString;
