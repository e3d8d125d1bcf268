//! # Error Handling
//!
//! Process-level error type for startup, configuration and server plumbing.
//! Secret resolution failures have their own type in [`crate::secrets::SecretsError`]
//! and are wrapped here when they surface outside the request path.

use crate::secrets::SecretsError;

/// Custom result type for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the credential proxy
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (listener bind, upstream HTTP clients)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Secret resolution errors raised outside a request (e.g. session bootstrap)
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Config(errors.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
