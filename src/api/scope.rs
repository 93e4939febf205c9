use std::fmt;

use serde::{Deserialize, Serialize};

/// Header carrying an advertising profile identifier.
pub const PROFILE_SCOPE_HEADER: &str = "Amazon-Advertising-API-Scope";
/// Header carrying a DSP advertiser/account identifier.
pub const ACCOUNT_SCOPE_HEADER: &str = "Amazon-Ads-AccountId";

/// Account scope attached to every resource request.
///
/// Chosen by configuration; a client never switches scope after construction.
///
/// # Example
/// ```
/// use amazon_ppc::api::Scope;
///
/// let scope = Scope::Profile("1234567890".to_string());
/// assert_eq!(scope.header_name(), "Amazon-Advertising-API-Scope");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// Sponsored ads profile (standard seller/vendor accounts).
    Profile(String),
    /// Amazon DSP advertiser.
    DspAdvertiser(String),
}

impl Scope {
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::Profile(_) => PROFILE_SCOPE_HEADER,
            Self::DspAdvertiser(_) => ACCOUNT_SCOPE_HEADER,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Profile(id) | Self::DspAdvertiser(id) => id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id().trim().is_empty()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile(id) => write!(f, "profile:{id}"),
            Self::DspAdvertiser(id) => write!(f, "dsp:{id}"),
        }
    }
}
