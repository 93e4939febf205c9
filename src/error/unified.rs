//! Error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error category driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    /// The provider answered 429.
    RateLimit,
    /// Local admission control could not grant capacity in time.
    RateLimitTimeout,
    Network,
    Timeout,
    Server,
    Validation,
    Configuration,
    Serialization,
    Cancelled,
    Unknown,
}

impl ErrorCategory {
    /// Transient categories are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::RateLimitTimeout | Self::Network | Self::Timeout | Self::Server
        )
    }
}

/// Structured details from an API error body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: Option<String>,
    pub request_id: Option<String>,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    FixRequest,
    IncreaseTimeout,
    ContactSupport,
}
