//! `bw` command construction and execution.
//!
//! Commands are only built through the constructors on [`CliCommand`], and
//! [`CliCommand::validate`] re-checks them against an allow-list right before
//! spawning. Session keys, passphrases and client secrets travel through the
//! child's environment, never its argv.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(10);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);
pub const UNLOCK_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_ARGUMENT_LEN: usize = 255;

/// One argument position of an allowed command form.
enum Slot {
    /// Must be exactly this token.
    Fixed(&'static str),
    /// Caller-supplied; checked with [`validate_cli_argument`].
    Value,
}

use Slot::{Fixed, Value};

/// Allowed forms of each sub-command, argument by argument.
const ALLOWED_COMMANDS: &[(&str, &[Slot])] = &[
    ("config", &[Fixed("server"), Value]),
    ("status", &[]),
    ("login", &[Fixed("--apikey")]),
    ("login", &[Value, Fixed("--passwordenv"), Fixed("BW_PASSWORD")]),
    ("unlock", &[Fixed("--passwordenv"), Fixed("BW_PASSWORD"), Fixed("--raw")]),
    ("get", &[Fixed("item"), Value]),
    ("list", &[Fixed("items"), Fixed("--search"), Value]),
    ("sync", &[]),
];

fn check_form(args: &[String], form: &[Slot]) -> Result<()> {
    if args.len() != form.len() {
        return Err(SecretsError::invalid_input("bw arguments do not match an allowed form"));
    }
    for (arg, slot) in args.iter().zip(form) {
        match slot {
            Fixed(token) if arg == token => {}
            Fixed(_) => {
                return Err(SecretsError::invalid_input("bw arguments do not match an allowed form"))
            }
            Value => validate_cli_argument(arg)?,
        }
    }
    Ok(())
}

const ALLOWED_ENV: &[&str] = &["BW_SESSION", "BW_PASSWORD", "BW_CLIENTID", "BW_CLIENTSECRET"];

/// Check a caller-controlled value before it becomes a `bw` argument.
pub fn validate_cli_argument(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SecretsError::invalid_input("argument cannot be empty"));
    }
    if value.chars().count() > MAX_ARGUMENT_LEN {
        return Err(SecretsError::invalid_input(format!(
            "argument exceeds {} characters",
            MAX_ARGUMENT_LEN
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(SecretsError::invalid_input("argument contains control characters"));
    }
    if value.starts_with('-') {
        return Err(SecretsError::invalid_input("argument cannot start with '-'"));
    }
    Ok(())
}

/// A single `bw` invocation.
#[derive(Clone)]
pub struct CliCommand {
    args: Vec<String>,
    env: Vec<(&'static str, SecretString)>,
    timeout: Duration,
}

impl CliCommand {
    fn new(args: &[&str], timeout: Duration) -> Self {
        Self { args: args.iter().map(|arg| arg.to_string()).collect(), env: Vec::new(), timeout }
    }

    fn with_env(mut self, key: &'static str, value: SecretString) -> Self {
        self.env.push((key, value));
        self
    }

    pub fn config_server(url: &str) -> Self {
        Self::new(&["config", "server", url], CONFIG_TIMEOUT)
    }

    pub fn status() -> Self {
        Self::new(&["status"], STATUS_TIMEOUT)
    }

    pub fn login_api_key(client_id: &str, client_secret: SecretString) -> Self {
        Self::new(&["login", "--apikey"], LOGIN_TIMEOUT)
            .with_env("BW_CLIENTID", SecretString::new(client_id))
            .with_env("BW_CLIENTSECRET", client_secret)
    }

    pub fn login_password(email: &str, password: SecretString) -> Self {
        Self::new(&["login", email, "--passwordenv", "BW_PASSWORD"], LOGIN_TIMEOUT)
            .with_env("BW_PASSWORD", password)
    }

    pub fn unlock(password: SecretString) -> Self {
        Self::new(&["unlock", "--passwordenv", "BW_PASSWORD", "--raw"], UNLOCK_TIMEOUT)
            .with_env("BW_PASSWORD", password)
    }

    pub fn get_item(name: &str, session: SecretString) -> Self {
        Self::new(&["get", "item", name], LOOKUP_TIMEOUT).with_env("BW_SESSION", session)
    }

    pub fn search_items(name: &str, session: SecretString) -> Self {
        Self::new(&["list", "items", "--search", name], LOOKUP_TIMEOUT)
            .with_env("BW_SESSION", session)
    }

    pub fn sync(session: SecretString) -> Self {
        Self::new(&["sync"], SYNC_TIMEOUT).with_env("BW_SESSION", session)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Value of an environment variable passed to the child, if set.
    pub fn env_value(&self, key: &str) -> Option<&SecretString> {
        self.env.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// First argument, used to label logs and errors.
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// Re-check the command against the allow-list.
    pub fn validate(&self) -> Result<()> {
        let (subcommand, rest) = self
            .args
            .split_first()
            .ok_or_else(|| SecretsError::invalid_input("empty bw command"))?;

        let mut forms = ALLOWED_COMMANDS
            .iter()
            .filter(|(name, _)| *name == subcommand.as_str())
            .map(|(_, form)| check_form(rest, form))
            .peekable();
        if forms.peek().is_none() {
            return Err(SecretsError::invalid_input("bw sub-command not allowed"));
        }
        // Any matching form admits the command; otherwise report the first mismatch.
        let mut first_err = None;
        for outcome in forms {
            match outcome {
                Ok(()) => {
                    first_err = None;
                    break;
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        if let Some((key, _)) = self.env.iter().find(|(key, _)| !ALLOWED_ENV.contains(key)) {
            return Err(SecretsError::invalid_input(format!("environment variable {} not allowed", key)));
        }

        Ok(())
    }
}

/// Output from a `bw` invocation.
///
/// Deliberately not `Debug`: stdout can hold item JSON or a session key.
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Returns the combined stdout and stderr
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Process boundary for the vault CLI.
#[async_trait]
pub trait VaultCli: Send + Sync {
    async fn run(&self, command: &CliCommand) -> Result<CommandOutput>;
}

/// Runs the real `bw` binary with tokio's process support.
#[derive(Debug, Clone)]
pub struct BwCli {
    binary: PathBuf,
}

impl Default for BwCli {
    fn default() -> Self {
        Self { binary: PathBuf::from("bw") }
    }
}

impl BwCli {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { binary: path.into() }
    }
}

#[async_trait]
impl VaultCli for BwCli {
    async fn run(&self, command: &CliCommand) -> Result<CommandOutput> {
        command.validate()?;
        debug!(subcommand = %command.subcommand(), timeout_ms = command.timeout.as_millis() as u64, "Running bw command");

        let mut child = Command::new(&self.binary);
        child
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            child.env(key, value.expose_secret());
        }

        let output = tokio::time::timeout(command.timeout, child.output())
            .await
            .map_err(|_| {
                warn!(subcommand = %command.subcommand(), "bw command timed out");
                SecretsError::transport(format!(
                    "bw {} timed out after {}s",
                    command.subcommand(),
                    command.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                warn!(subcommand = %command.subcommand(), error = %e, "Failed to spawn bw");
                SecretsError::transport(format!("failed to spawn bw: {}", e.kind()))
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
