//! One-time CLI session bootstrap and periodic session refresh.
//!
//! The `bw` CLI keeps its login state in a per-user data file, so two
//! bootstraps running at once would trample each other. Every bootstrap in the
//! process serializes on [`BOOTSTRAP_LOCK`].

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::{CliCommand, CommandOutput, VaultCli};
use super::CliCipherSource;
use crate::secrets::backends::token::ClientCredentials;
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

/// Attempts made for `bw login` when the server answers with a rate limit.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Backoff before attempt `n` (n >= 2) is `n² × LOGIN_BACKOFF_UNIT`.
pub const LOGIN_BACKOFF_UNIT: Duration = Duration::from_secs(5);

static BOOTSTRAP_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const LOGGED_IN_MARKERS: &[&str] = &["You are logged in!", "already logged in"];
const RATE_LIMIT_MARKER: &str = "Rate limit";

/// How the CLI authenticates before unlocking.
#[derive(Clone)]
pub enum LoginMethod {
    /// `bw login --apikey` with personal API credentials.
    ApiKey(ClientCredentials),
    /// `bw login <email> --passwordenv BW_PASSWORD`.
    Password { email: String },
}

impl LoginMethod {
    fn command(&self, master_password: &SecretString) -> CliCommand {
        match self {
            Self::ApiKey(credentials) => {
                CliCommand::login_api_key(&credentials.client_id, credentials.client_secret.clone())
            }
            Self::Password { email } => CliCommand::login_password(email, master_password.clone()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "apikey",
            Self::Password { .. } => "password",
        }
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

enum LoginOutcome {
    LoggedIn,
    RateLimited,
    Failed(Option<i32>),
}

fn classify_login(output: &CommandOutput) -> LoginOutcome {
    let combined = output.combined_output();
    if output.success() || LOGGED_IN_MARKERS.iter().any(|marker| combined.contains(marker)) {
        LoginOutcome::LoggedIn
    } else if combined.contains(RATE_LIMIT_MARKER) {
        LoginOutcome::RateLimited
    } else {
        LoginOutcome::Failed(output.exit_code)
    }
}

/// Drives `bw config server` → `bw status` → `bw login` → `bw unlock`.
#[derive(Clone)]
pub struct SessionBootstrap {
    cli: Arc<dyn VaultCli>,
    server_url: String,
    login: LoginMethod,
    master_password: SecretString,
}

impl SessionBootstrap {
    pub fn new(
        cli: Arc<dyn VaultCli>,
        server_url: impl Into<String>,
        login: LoginMethod,
        master_password: SecretString,
    ) -> Self {
        Self { cli, server_url: server_url.into(), login, master_password }
    }

    /// Produce an unlocked session key.
    pub async fn establish(&self) -> Result<SecretString> {
        let _guard = BOOTSTRAP_LOCK.lock().await;
        info!(server_url = %self.server_url, login_method = self.login.label(), "Initializing vault CLI session");

        self.configure_server().await?;

        if self.is_logged_in().await {
            info!("CLI already logged in, skipping login");
        } else {
            self.login_with_retry().await?;
        }

        let session = self.unlock().await?;
        info!("Vault CLI session established");
        Ok(session)
    }

    async fn configure_server(&self) -> Result<()> {
        let output = self.cli.run(&CliCommand::config_server(&self.server_url)).await?;
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "bw config server failed");
            return Err(SecretsError::auth_failure("bw config server failed"));
        }
        Ok(())
    }

    async fn is_logged_in(&self) -> bool {
        let output = match self.cli.run(&CliCommand::status()).await {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "Failed to check CLI status");
                return false;
            }
        };

        match serde_json::from_str::<StatusResponse>(output.stdout.trim()) {
            Ok(status) => {
                debug!(status = %status.status, "CLI status");
                matches!(status.status.as_str(), "locked" | "unlocked")
            }
            Err(_) => false,
        }
    }

    async fn login_with_retry(&self) -> Result<()> {
        let command = self.login.command(&self.master_password);

        for attempt in 1..=MAX_LOGIN_ATTEMPTS {
            if attempt > 1 {
                let backoff = LOGIN_BACKOFF_UNIT * attempt * attempt;
                info!(attempt, max_attempts = MAX_LOGIN_ATTEMPTS, backoff_secs = backoff.as_secs(), "Retrying CLI login");
                tokio::time::sleep(backoff).await;
            }

            let output = self.cli.run(&command).await?;
            match classify_login(&output) {
                LoginOutcome::LoggedIn => {
                    info!(attempt, "CLI login successful");
                    return Ok(());
                }
                LoginOutcome::RateLimited => {
                    warn!(attempt, max_attempts = MAX_LOGIN_ATTEMPTS, "CLI login rate limited");
                }
                LoginOutcome::Failed(exit_code) => {
                    warn!(attempt, exit_code = ?exit_code, "CLI login failed");
                    return Err(SecretsError::auth_failure("bw login failed"));
                }
            }
        }

        Err(SecretsError::auth_failure("bw login rate limited"))
    }

    async fn unlock(&self) -> Result<SecretString> {
        let output = self.cli.run(&CliCommand::unlock(self.master_password.clone())).await?;
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "bw unlock failed");
            return Err(SecretsError::auth_failure("bw unlock failed"));
        }

        let session = output.stdout.trim();
        if session.is_empty() {
            return Err(SecretsError::auth_failure("empty session returned by unlock"));
        }
        Ok(SecretString::new(session))
    }

    /// Re-run the bootstrap every `interval`, swapping the new session into `source`.
    ///
    /// A failed refresh keeps the previous session in place.
    pub fn spawn_refresh(
        self,
        source: Arc<CliCipherSource>,
        interval: Duration,
    ) -> SessionRefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        info!("Refreshing vault CLI session");
                        match self.establish().await {
                            Ok(session) => source.set_session(session),
                            Err(err) => error!(error = %err, "Session refresh failed, keeping previous session"),
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

        SessionRefreshHandle { shutdown_tx, handle }
    }
}

/// Handle for the background session refresh task.
pub struct SessionRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SessionRefreshHandle {
    /// Signal the task to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        debug!("Session refresh task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fail, ok, ScriptedCli};
    use super::*;
    use crate::secrets::client::SecretSource;

    fn bootstrap(cli: Arc<ScriptedCli>) -> SessionBootstrap {
        SessionBootstrap::new(
            cli,
            "https://vault.example.com",
            LoginMethod::Password { email: "ops@example.com".to_string() },
            SecretString::new("master"),
        )
    }

    #[tokio::test]
    async fn test_already_logged_in_skips_login() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok("Saved setting `config`."),
            ok(r#"{"serverUrl":"https://vault.example.com","status":"locked"}"#),
            ok("c2Vzc2lvbg==\n"),
        ]));

        let session = bootstrap(cli.clone()).establish().await.unwrap();

        assert_eq!(session.expose_secret(), "c2Vzc2lvbg==");
        let calls = cli.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], vec!["unlock", "--passwordenv", "BW_PASSWORD", "--raw"]);
    }

    #[tokio::test]
    async fn test_logs_in_when_unauthenticated() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok(""),
            ok(r#"{"status":"unauthenticated"}"#),
            fail("You are already logged in as ops@example.com."),
            ok("session"),
        ]));

        let session = bootstrap(cli.clone()).establish().await.unwrap();

        assert_eq!(session.expose_secret(), "session");
        assert_eq!(cli.calls()[2], vec!["login", "ops@example.com", "--passwordenv", "BW_PASSWORD"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_login_retries_with_backoff() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok(""),
            ok(r#"{"status":"unauthenticated"}"#),
            fail("Rate limit exceeded. Try again later."),
            fail("Rate limit exceeded. Try again later."),
            ok("You are logged in!"),
            ok("session"),
        ]));

        let started = tokio::time::Instant::now();
        let session = bootstrap(cli.clone()).establish().await.unwrap();

        assert_eq!(session.expose_secret(), "session");
        // 2² × 5s + 3² × 5s
        assert!(started.elapsed() >= Duration::from_secs(65));
        assert_eq!(cli.calls().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausts_attempts() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok(""),
            ok(r#"{"status":"unauthenticated"}"#),
            fail("Rate limit"),
            fail("Rate limit"),
            fail("Rate limit"),
        ]));

        let err = bootstrap(cli.clone()).establish().await.unwrap_err();

        assert!(matches!(err, SecretsError::AuthFailure { .. }));
        assert_eq!(cli.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_other_login_failures_are_not_retried() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok(""),
            ok(r#"{"status":"unauthenticated"}"#),
            fail("Username or password is incorrect. Try again."),
        ]));

        let err = bootstrap(cli.clone()).establish().await.unwrap_err();

        assert!(matches!(err, SecretsError::AuthFailure { .. }));
        assert_eq!(cli.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_unlock_output_is_auth_failure() {
        let cli = Arc::new(ScriptedCli::new(vec![ok(""), ok(r#"{"status":"unlocked"}"#), ok("  \n")]));

        let err = bootstrap(cli).establish().await.unwrap_err();
        assert_eq!(err, SecretsError::auth_failure("empty session returned by unlock"));
    }

    #[tokio::test]
    async fn test_api_key_login_uses_apikey_flag() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok(""),
            ok(r#"{"status":"unauthenticated"}"#),
            ok("You are logged in!"),
            ok("session"),
        ]));
        let bootstrap = SessionBootstrap::new(
            cli.clone(),
            "https://vault.example.com",
            LoginMethod::ApiKey(ClientCredentials::new("user.abc", SecretString::new("s"))),
            SecretString::new("master"),
        );

        bootstrap.establish().await.unwrap();
        assert_eq!(cli.calls()[2], vec!["login", "--apikey"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_swaps_session() {
        let cli = Arc::new(ScriptedCli::new(vec![
            ok(""),
            ok(r#"{"status":"locked"}"#),
            ok("refreshed-session"),
            ok(r#"{"id":"1","name":"A","type":2,"notes":"n"}"#),
        ]));
        let source = Arc::new(CliCipherSource::new(cli.clone(), SecretString::new("old")));

        let handle = bootstrap(cli.clone()).spawn_refresh(source.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown().await;

        source.fetch("A").await.unwrap();
        let calls = cli.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(source.session().unwrap().expose_secret(), "refreshed-session");
    }
}
