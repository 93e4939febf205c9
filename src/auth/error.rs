use thiserror::Error;

use crate::error::ErrorCategory;

/// Authentication errors from the token endpoint and resource calls.
///
/// `Clone` so one refresh outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No refresh token configured")]
    MissingRefreshToken,
    #[error("Refresh token rejected: {0}")]
    Revoked(String),
    #[error("Client credentials rejected: {0}")]
    InvalidClient(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Authorization server unreachable after {attempts} attempts: {message}")]
    Unreachable { attempts: u32, message: String },
    #[error("Authorization server error (status {status})")]
    Server { status: u16 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Category used by the retry policy while talking to the token endpoint.
    ///
    /// Once surfaced to callers every auth error is terminal; only transport
    /// failures of the exchange itself are retried internally.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Io(_) | Self::Serialization(_) | Self::InvalidResponse(_) => {
                ErrorCategory::Serialization
            }
            _ => ErrorCategory::Authentication,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
