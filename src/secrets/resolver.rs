//! Cache-first secret resolution.
//!
//! [`SecretResolver`] is the only entry point the HTTP layer uses. It checks
//! the [`SecretCache`], delegates misses to the configured [`SecretSource`] and
//! writes successful lookups back. Failures are never cached and never retried
//! here; the caller decides whether to try again.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::backends::{
    vault_http_client, ApiCipherSource, BwCli, CliCipherSource, ClientCredentials, LoginMethod,
    SessionBootstrap, SessionRefreshHandle, TokenAuthority,
};
use super::cache::SecretCache;
use super::client::SecretSource;
use super::error::{Result, SecretsError};
use super::types::SecretString;

/// How the service authenticates against the vault. Chosen once at startup.
#[derive(Clone)]
pub enum AuthStrategy {
    /// HTTP API with client credentials.
    Api(ClientCredentials),
    /// CLI with a session key obtained out of band.
    CliSession(SecretString),
    /// CLI with a session key produced by running the login/unlock sequence.
    CliBootstrap { login: LoginMethod, master_password: SecretString },
}

impl AuthStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Api(_) => "api",
            Self::CliSession(_) => "cli_session",
            Self::CliBootstrap { .. } => "cli_bootstrap",
        }
    }
}

/// Everything needed to assemble a resolver.
#[derive(Clone)]
pub struct ResolverSettings {
    pub base_url: String,
    pub strategy: AuthStrategy,
    pub cache_ttl: Duration,
    pub cli_path: String,
    /// Zero disables background session refresh.
    pub session_refresh: Duration,
}

pub struct SecretResolver {
    source: Arc<dyn SecretSource>,
    cache: Arc<SecretCache>,
}

impl SecretResolver {
    pub fn new(source: Arc<dyn SecretSource>, cache: Arc<SecretCache>) -> Self {
        Self { source, cache }
    }

    /// Resolve `name` to its value.
    pub async fn resolve(&self, name: &str) -> Result<SecretString> {
        if name.is_empty() {
            return Err(SecretsError::invalid_input("secret name cannot be empty"));
        }

        if let Some(value) = self.cache.get(name) {
            debug!(secret_name = %name, "Cache hit");
            return Ok(value);
        }

        let generation = self.cache.generation();
        debug!(secret_name = %name, source = self.source.source_type(), "Fetching secret from vault");
        match self.source.fetch(name).await {
            Ok(value) => {
                metrics::counter!("secret_upstream_requests_total", "outcome" => "ok").increment(1);
                self.cache.put_if_current(name, value.clone(), generation);
                Ok(value)
            }
            Err(err) => {
                metrics::counter!("secret_upstream_requests_total", "outcome" => err.kind())
                    .increment(1);
                debug!(secret_name = %name, error = %err, "Secret lookup failed");
                Err(err)
            }
        }
    }

    /// Drop every cached value. Returns how many entries were removed.
    pub fn invalidate_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(removed, "Secret cache cleared");
        removed
    }

    /// Ask the source to pull fresh vault state (a no-op for the HTTP API).
    pub async fn sync_upstream(&self) -> Result<()> {
        self.source.sync().await
    }

    pub fn source_type(&self) -> &'static str {
        self.source.source_type()
    }

    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }

    /// Stop the cache sweeper.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}

/// A resolver plus the background tasks it owns.
pub struct ConnectedResolver {
    pub resolver: Arc<SecretResolver>,
    session_refresh: Option<SessionRefreshHandle>,
}

impl ConnectedResolver {
    /// Build the configured strategy, bootstrapping a CLI session if required.
    pub async fn connect(settings: ResolverSettings) -> Result<Self> {
        let cache = Arc::new(SecretCache::new(settings.cache_ttl));
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        info!(
            strategy = settings.strategy.label(),
            base_url = %base_url,
            cache_ttl_secs = settings.cache_ttl.as_secs(),
            "Configuring secret resolver"
        );

        let mut session_refresh = None;
        let source: Arc<dyn SecretSource> = match settings.strategy {
            AuthStrategy::Api(credentials) => {
                let http = vault_http_client()?;
                let tokens = Arc::new(TokenAuthority::new(http.clone(), &base_url, credentials));
                Arc::new(ApiCipherSource::new(http, &base_url, tokens))
            }
            AuthStrategy::CliSession(session) => {
                let cli = Arc::new(BwCli::with_path(&settings.cli_path));
                Arc::new(CliCipherSource::new(cli, session))
            }
            AuthStrategy::CliBootstrap { login, master_password } => {
                let cli = Arc::new(BwCli::with_path(&settings.cli_path));
                let bootstrap = SessionBootstrap::new(cli.clone(), &base_url, login, master_password);
                let session = bootstrap.establish().await?;
                let source = Arc::new(CliCipherSource::new(cli, session));

                if settings.session_refresh.is_zero() {
                    warn!("Session refresh disabled; CLI session will not be renewed");
                } else {
                    session_refresh =
                        Some(bootstrap.spawn_refresh(source.clone(), settings.session_refresh));
                }
                source
            }
        };

        Ok(Self { resolver: Arc::new(SecretResolver::new(source, cache)), session_refresh })
    }

    /// Stop the session refresh task and the cache sweeper.
    pub async fn shutdown(self) {
        if let Some(refresh) = self.session_refresh {
            refresh.shutdown().await;
        }
        self.resolver.shutdown().await;
    }
}
