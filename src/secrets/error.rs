//! Error types for secret resolution.
//!
//! Messages carry statuses and structural reasons only. Upstream bodies,
//! bearer tokens, passphrases and secret values never end up in an error.

use thiserror::Error;

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while resolving a secret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretsError {
    /// Caller supplied an unusable name.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Credential exchange or session bootstrap was rejected.
    #[error("{}", auth_failure_message(.status, .reason))]
    AuthFailure { status: Option<u16>, reason: String },

    /// Network failure, timeout or process spawn failure.
    #[error("Transport failure: {reason}")]
    TransportFailure { reason: String },

    /// No vault entry carries the requested name.
    #[error("Secret not found: {name}")]
    SecretNotFound { name: String },

    /// The matching entry has no field the extraction rules accept.
    #[error("No extractable value for secret: {name}")]
    NoValueExtractable { name: String },

    /// The vault answered with an unexpected status.
    #[error("Upstream returned status {status}")]
    UpstreamError { status: u16 },

    /// The vault answered 200 with a body that could not be decoded.
    #[error("Invalid upstream response: {reason}")]
    InvalidResponse { reason: String },
}

fn auth_failure_message(status: &Option<u16>, reason: &str) -> String {
    match status {
        Some(status) => format!("Authentication failed with status {}", status),
        None => format!("Authentication failed: {}", reason),
    }
}

impl SecretsError {
    /// Create an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput { reason: reason.into() }
    }

    /// Create an authentication failure carrying only the upstream status.
    pub fn auth_failure_status(status: u16) -> Self {
        Self::AuthFailure { status: Some(status), reason: String::new() }
    }

    /// Create an authentication failure with a structural reason.
    pub fn auth_failure(reason: impl Into<String>) -> Self {
        Self::AuthFailure { status: None, reason: reason.into() }
    }

    /// Create a transport failure.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::TransportFailure { reason: reason.into() }
    }

    /// Create a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::SecretNotFound { name: name.into() }
    }

    /// Create a no-value error.
    pub fn no_value(name: impl Into<String>) -> Self {
        Self::NoValueExtractable { name: name.into() }
    }

    /// Create an upstream status error.
    pub fn upstream(status: u16) -> Self {
        Self::UpstreamError { status }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse { reason: reason.into() }
    }

    /// Map a reqwest failure onto the transport variant. The request URL is never included.
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_decode() {
            "response decode failed"
        } else if err.is_body() {
            "response body read failed"
        } else {
            "request failed"
        };
        Self::transport(reason)
    }

    /// Short machine-readable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::AuthFailure { .. } => "auth_failure",
            Self::TransportFailure { .. } => "transport_failure",
            Self::SecretNotFound { .. } => "not_found",
            Self::NoValueExtractable { .. } => "no_value",
            Self::UpstreamError { .. } => "upstream_error",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }
}
