//! Secret lookup through the Bitwarden CLI.
//!
//! Used when the service runs with a pre-obtained (or bootstrapped) session key
//! instead of API client credentials. Lookups try `bw get item <name>` first and
//! fall back to `bw list items --search <name>`, taking the first result.

pub mod bootstrap;
pub mod command;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

pub use bootstrap::{LoginMethod, SessionBootstrap, SessionRefreshHandle};
pub use command::{validate_cli_argument, BwCli, CliCommand, CommandOutput, VaultCli};

use super::cipher::VaultEntry;
use crate::secrets::client::{validate_lookup_name, SecretSource};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

pub struct CliCipherSource {
    cli: Arc<dyn VaultCli>,
    session: RwLock<SecretString>,
}

impl CliCipherSource {
    pub fn new(cli: Arc<dyn VaultCli>, session: SecretString) -> Self {
        Self { cli, session: RwLock::new(session) }
    }

    /// Replace the session key, e.g. after a background re-unlock.
    pub fn set_session(&self, session: SecretString) {
        if let Ok(mut current) = self.session.write() {
            *current = session;
        }
    }

    fn session(&self) -> Result<SecretString> {
        self.session
            .read()
            .map(|session| session.clone())
            .map_err(|_| SecretsError::auth_failure("session state unavailable"))
    }

    async fn search(&self, name: &str, session: SecretString) -> Result<VaultEntry> {
        info!(secret_name = %name, "Exact lookup failed, searching vault");
        let output = self.cli.run(&CliCommand::search_items(name, session)).await?;
        if !output.success() {
            warn!(secret_name = %name, exit_code = ?output.exit_code, "bw list items failed");
            return Err(SecretsError::transport(format!(
                "bw list exited with code {}",
                exit_code_label(output.exit_code)
            )));
        }

        let items: Vec<VaultEntry> = serde_json::from_str(&output.stdout)
            .map_err(|_| SecretsError::invalid_response("bw list output is not valid JSON"))?;

        let count = items.len();
        let first = items.into_iter().next().ok_or_else(|| SecretsError::not_found(name))?;
        if count > 1 {
            warn!(
                secret_name = %name,
                chosen_name = %first.name(),
                chosen_id = %first.id(),
                matches = count,
                "Multiple items found, using first match"
            );
        }
        Ok(first)
    }
}

fn exit_code_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
}

#[async_trait]
impl SecretSource for CliCipherSource {
    async fn fetch(&self, name: &str) -> Result<SecretString> {
        validate_lookup_name(name)?;
        validate_cli_argument(name)?;
        let session = self.session()?;

        let exact = self.cli.run(&CliCommand::get_item(name, session.clone())).await?;
        let entry = if exact.success() {
            serde_json::from_str::<VaultEntry>(&exact.stdout)
                .map_err(|_| SecretsError::invalid_response("bw get output is not valid JSON"))?
        } else {
            self.search(name, session).await?
        };

        entry.cli_value().map(SecretString::new).ok_or_else(|| SecretsError::no_value(name))
    }

    async fn sync(&self) -> Result<()> {
        let output = self.cli.run(&CliCommand::sync(self.session()?)).await?;
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "bw sync failed");
            return Err(SecretsError::transport(format!(
                "bw sync exited with code {}",
                exit_code_label(output.exit_code)
            )));
        }
        info!("Vault synced successfully");
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "cli"
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted stand-in for the `bw` binary.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub struct ScriptedCli {
        responses: Mutex<VecDeque<CommandOutput>>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedCli {
        pub fn new(responses: Vec<CommandOutput>) -> Self {
            Self { responses: Mutex::new(responses.into()), calls: Mutex::new(Vec::new()) }
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput { stdout: stdout.to_string(), stderr: String::new(), exit_code: Some(0) }
    }

    pub fn fail(output: &str) -> CommandOutput {
        CommandOutput { stdout: output.to_string(), stderr: String::new(), exit_code: Some(1) }
    }

    #[async_trait]
    impl VaultCli for ScriptedCli {
        async fn run(&self, command: &CliCommand) -> Result<CommandOutput> {
            command.validate()?;
            self.calls.lock().unwrap().push(command.args().to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SecretsError::transport("no scripted response left"))
        }
    }
}
