//! Upstream lookup strategy trait.

use async_trait::async_trait;

use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Longest secret name any source will look up.
pub const MAX_LOOKUP_NAME_LEN: usize = 255;

/// Reject names no vault entry can carry before anything goes upstream.
pub fn validate_lookup_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SecretsError::invalid_input("secret name cannot be empty"));
    }
    if name.chars().count() > MAX_LOOKUP_NAME_LEN {
        return Err(SecretsError::invalid_input(format!(
            "secret name exceeds {} characters",
            MAX_LOOKUP_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SecretsError::invalid_input("secret name contains control characters"));
    }
    Ok(())
}

/// A strategy for turning a secret name into a value by asking the vault.
///
/// Two implementations exist: [`ApiCipherSource`](super::backends::ApiCipherSource)
/// talks to the vault's HTTP API with a client-credentials token, and
/// [`CliCipherSource`](super::backends::CliCipherSource) drives the `bw` CLI
/// with an unlocked session. The resolver holds exactly one of them, picked
/// at construction time.
///
/// Implementations must not cache; caching is the resolver's job.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Locate the entry named `name` and extract its scalar value.
    async fn fetch(&self, name: &str) -> Result<SecretString>;

    /// Pull the latest vault state into the source, if the source keeps a local copy.
    async fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Short label used in logs and metrics.
    fn source_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lookup_name() {
        assert!(validate_lookup_name("DB_URL").is_ok());
        assert!(validate_lookup_name("prod/api key").is_ok());
        assert!(validate_lookup_name(&"a".repeat(255)).is_ok());
        assert!(validate_lookup_name("").is_err());
        assert!(validate_lookup_name(&"a".repeat(256)).is_err());
        assert!(validate_lookup_name("bad\nname").is_err());
        assert!(validate_lookup_name("tab\tname").is_err());
    }
}
