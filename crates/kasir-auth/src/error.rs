//! Error types for the step-up authenticator

use thiserror::Error;

/// Result type alias for authenticator operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors returned by an authentication session
///
/// A wrong PIN is not an error: it is reported as an
/// [`AuthOutcome`](crate::AuthOutcome). These variants cover calls the
/// session refuses to evaluate at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Candidate is not exactly six ASCII digits, or a digit/index is out of range
    #[error("Malformed PIN input: {0}")]
    MalformedInput(String),

    /// Submission while the lockout countdown is running
    #[error("Locked out for another {remaining_ms} ms")]
    PolicyViolation { remaining_ms: u64 },

    /// Call made after `cancel()`
    #[error("Session was cancelled")]
    SessionTerminated,

    /// A second `authenticate()` while a lookup is still pending
    #[error("Authentication already in progress")]
    AuthenticationInFlight,

    /// Policy and session disagree; the session stays usable
    #[error("Internal authenticator error: {0}")]
    Internal(String),
}

/// Failures of the credential directory collaborator
///
/// None of these count as a wrong PIN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Directory transport error: {0}")]
    Transport(String),

    #[error("Directory lookup timed out after {0} ms")]
    Timeout(u64),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors loading configuration or credential files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e.to_string())
    }
}
