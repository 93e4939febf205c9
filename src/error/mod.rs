//! Error types for the Advertising API core.

pub mod unified;

pub use unified::{ErrorCategory, ErrorDetails, RecoverySuggestion};

use thiserror::Error;

use crate::api::{Action, ResourceType};
use crate::auth::AuthError;

/// Primary error type for all operations.
#[derive(Error, Debug)]
pub enum PpcError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Rate limit budget for {partition} exhausted after waiting {waited_ms}ms")]
    RateLimitTimeout { partition: String, waited_ms: u64 },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Validation error{}: {message}", describe_target(.resource, .action, .item_index))]
    Validation {
        resource: Option<ResourceType>,
        action: Option<Action>,
        status: Option<u16>,
        message: String,
        item_index: Option<usize>,
    },

    #[error("Transport error (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
        details: Option<ErrorDetails>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Refusing to retry {action} on {resource} without an idempotency key: {cause}")]
    UnsafeRetry {
        resource: ResourceType,
        action: Action,
        #[source]
        cause: Box<PpcError>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe_target(
    resource: &Option<ResourceType>,
    action: &Option<Action>,
    item_index: &Option<usize>,
) -> String {
    let mut out = String::new();
    if let (Some(resource), Some(action)) = (resource, action) {
        out.push_str(&format!(" ({action} {resource})"));
    }
    if let Some(index) = item_index {
        out.push_str(&format!(" at item {index}"));
    }
    out
}

impl PpcError {
    /// Build a 5xx transport error.
    pub fn server(status: u16, message: impl Into<String>, details: Option<ErrorDetails>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
            details,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::RateLimitTimeout { .. } => ErrorCategory::RateLimitTimeout,
            Self::Network(err) if err.is_timeout() => ErrorCategory::Timeout,
            Self::Network(err) if err.is_decode() => ErrorCategory::Serialization,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Transport { status, .. } => match status {
                Some(500..=599) => ErrorCategory::Server,
                _ => ErrorCategory::Network,
            },
            Self::Validation { .. } | Self::InvalidArgument(_) => ErrorCategory::Validation,
            Self::UnsafeRetry { .. } => ErrorCategory::Validation,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::InvalidResponse(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        self.category().is_transient()
    }

    /// Server-provided delay before the next attempt.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Shift a call-relative item index into the caller's item sequence and
    /// fill in the target if it is missing.
    pub fn in_batch(self, resource: ResourceType, action: Action, offset: usize) -> Self {
        match self {
            Self::Validation {
                resource: r,
                action: a,
                status,
                message,
                item_index,
            } => Self::Validation {
                resource: r.or(Some(resource)),
                action: a.or(Some(action)),
                status,
                message,
                item_index: item_index.map(|index| index + offset),
            },
            other => other,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit
            | ErrorCategory::Network
            | ErrorCategory::Server => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::RateLimitTimeout | ErrorCategory::Timeout => {
                RecoverySuggestion::IncreaseTimeout
            }
            ErrorCategory::Validation => RecoverySuggestion::FixRequest,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PpcError>;
