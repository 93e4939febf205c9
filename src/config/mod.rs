//! Configuration system (layered: code > env > config file).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::api::{ResourceType, Scope};
use crate::auth::Secret;
use crate::error::PpcError;
use crate::util::retry::RetryPolicy;

/// Advertising API region; selects API host and LWA endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Region {
    #[default]
    #[serde(rename = "na")]
    #[strum(serialize = "na")]
    NorthAmerica,
    #[serde(rename = "eu")]
    #[strum(serialize = "eu")]
    Europe,
    #[serde(rename = "fe")]
    #[strum(serialize = "fe")]
    FarEast,
}

impl Region {
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::NorthAmerica => "https://advertising-api.amazon.com",
            Self::Europe => "https://advertising-api-eu.amazon.com",
            Self::FarEast => "https://advertising-api-fe.amazon.com",
        }
    }

    pub fn token_url(&self) -> &'static str {
        match self {
            Self::NorthAmerica => "https://api.amazon.com/auth/o2/token",
            Self::Europe => "https://api.amazon.co.uk/auth/o2/token",
            Self::FarEast => "https://api.amazon.co.jp/auth/o2/token",
        }
    }

    pub fn authorize_url(&self) -> &'static str {
        match self {
            Self::NorthAmerica => "https://www.amazon.com/ap/oa",
            Self::Europe => "https://eu.account.amazon.com/ap/oa",
            Self::FarEast => "https://apac.account.amazon.com/ap/oa",
        }
    }
}

/// Explicit endpoint URLs, overriding the region defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointOverrides {
    pub api_base_url: Option<String>,
    pub token_url: Option<String>,
    pub authorize_url: Option<String>,
}

/// Token-bucket parameters applied to each API partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 5.0,
        }
    }
}

/// Serializable form of [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub max_elapsed_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            max_elapsed_ms: policy.max_elapsed.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.multiplier,
            max_elapsed: Duration::from_millis(settings.max_elapsed_ms),
            jitter: settings.jitter,
        }
    }
}

/// Tunables of the gateway and batch reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    /// Per-resource batch sizes, keyed by resource name (`campaign`, `adGroup`, ...).
    pub batch_sizes: BTreeMap<String, usize>,
    /// Sub-batches dispatched concurrently per bulk submission.
    pub concurrency: usize,
    pub token_safety_margin_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            batch_sizes: BTreeMap::new(),
            concurrency: 4,
            token_safety_margin_secs: 60,
            request_timeout_secs: 60,
        }
    }
}

/// Client configuration.
///
/// # Example
/// ```
/// use amazon_ppc::config::PpcConfig;
///
/// let config = PpcConfig::from_toml_str(r#"
///     client_id = "amzn1.application-oa2-client.abc"
///     client_secret = "secret"
///     refresh_token = "Atzr|token"
///     scope = { type = "profile", id = "1234567890" }
///
///     [tuning]
///     concurrency = 2
/// "#)?;
/// assert_eq!(config.tuning.concurrency, 2);
/// # Ok::<(), amazon_ppc::error::PpcError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpcConfig {
    pub client_id: String,
    pub client_secret: Secret,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<Secret>,
    pub scope: Scope,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub endpoints: EndpointOverrides,
    #[serde(default)]
    pub tuning: Tuning,
    /// Persist refreshed tokens to disk.
    #[serde(default)]
    pub persist_tokens: bool,
    /// Directory for persisted tokens (defaults to `~/.amazon-ppc`).
    #[serde(default)]
    pub token_dir: Option<PathBuf>,
}

impl PpcConfig {
    /// Minimal configuration with default tuning.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
        refresh_token: impl Into<Secret>,
        scope: Scope,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
            refresh_token: Some(refresh_token.into()),
            scope,
            region: Region::default(),
            endpoints: EndpointOverrides::default(),
            tuning: Tuning::default(),
            persist_tokens: false,
            token_dir: None,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, PpcError> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| PpcError::Configuration(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, PpcError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PpcError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from environment variables (a `.env` file is honoured).
    ///
    /// `AMAZON_ADS_PROFILE_ID` and `AMAZON_ADS_DSP_ADVERTISER_ID` select the
    /// scope; setting both is an error.
    pub fn from_env() -> Result<Self, PpcError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PpcError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| PpcError::Configuration(format!("{name} is not set")))
        };

        let scope = match (
            lookup("AMAZON_ADS_PROFILE_ID"),
            lookup("AMAZON_ADS_DSP_ADVERTISER_ID"),
        ) {
            (Some(profile), None) => Scope::Profile(profile),
            (None, Some(advertiser)) => Scope::DspAdvertiser(advertiser),
            (Some(_), Some(_)) => {
                return Err(PpcError::Configuration(
                    "set only one of AMAZON_ADS_PROFILE_ID and AMAZON_ADS_DSP_ADVERTISER_ID"
                        .to_string(),
                ))
            }
            (None, None) => {
                return Err(PpcError::Configuration(
                    "AMAZON_ADS_PROFILE_ID or AMAZON_ADS_DSP_ADVERTISER_ID must be set".to_string(),
                ))
            }
        };

        let mut config = Self {
            client_id: required("AMAZON_ADS_CLIENT_ID")?,
            client_secret: Secret::new(required("AMAZON_ADS_CLIENT_SECRET")?),
            redirect_uri: lookup("AMAZON_ADS_REDIRECT_URI"),
            refresh_token: lookup("AMAZON_ADS_REFRESH_TOKEN").map(Secret::new),
            scope,
            region: Region::default(),
            endpoints: EndpointOverrides::default(),
            tuning: Tuning::default(),
            persist_tokens: false,
            token_dir: lookup("AMAZON_ADS_TOKEN_DIR").map(PathBuf::from),
        };
        if let Some(region) = lookup("AMAZON_ADS_REGION") {
            config.region = Region::from_str(&region.to_ascii_lowercase()).map_err(|_| {
                PpcError::Configuration(format!("unknown region {region} (expected na, eu or fe)"))
            })?;
        }
        if let Some(url) = lookup("AMAZON_ADS_API_BASE_URL") {
            config.endpoints.api_base_url = Some(url);
        }
        config.persist_tokens = config.token_dir.is_some();
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and tunables.
    pub fn validate(&self) -> Result<(), PpcError> {
        if self.client_id.trim().is_empty() {
            return Err(PpcError::Configuration("client_id is empty".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(PpcError::Configuration("client_secret is empty".to_string()));
        }
        if self.scope.is_empty() {
            return Err(PpcError::Configuration("scope id is empty".to_string()));
        }
        let tuning = &self.tuning;
        if tuning.rate_limit.capacity == 0 || tuning.rate_limit.refill_per_second <= 0.0 {
            return Err(PpcError::Configuration(
                "rate_limit capacity and refill_per_second must be positive".to_string(),
            ));
        }
        if tuning.concurrency == 0 {
            return Err(PpcError::Configuration("concurrency must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&tuning.retry.jitter) || tuning.retry.multiplier < 1.0 {
            return Err(PpcError::Configuration(
                "retry jitter must be within [0, 1] and multiplier at least 1".to_string(),
            ));
        }
        for (name, size) in &tuning.batch_sizes {
            let resource = ResourceType::from_str(name).map_err(|_| {
                PpcError::Configuration(format!("unknown resource in batch_sizes: {name}"))
            })?;
            if *size == 0 || *size > resource.max_batch_size() {
                return Err(PpcError::Configuration(format!(
                    "batch size for {name} must be within 1..={}",
                    resource.max_batch_size()
                )));
            }
        }
        Ok(())
    }

    /// Effective batch size for `resource`.
    pub fn batch_size(&self, resource: ResourceType) -> usize {
        self.tuning
            .batch_sizes
            .get(resource.as_ref())
            .copied()
            .unwrap_or_else(|| resource.max_batch_size())
    }

    pub fn api_base_url(&self) -> &str {
        self.endpoints
            .api_base_url
            .as_deref()
            .unwrap_or_else(|| self.region.api_base_url())
    }

    pub fn token_url(&self) -> &str {
        self.endpoints
            .token_url
            .as_deref()
            .unwrap_or_else(|| self.region.token_url())
    }

    pub fn authorize_url(&self) -> &str {
        self.endpoints
            .authorize_url
            .as_deref()
            .unwrap_or_else(|| self.region.authorize_url())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.tuning.retry)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.tuning.request_timeout_secs.max(1))
    }

    pub fn token_safety_margin(&self) -> Duration {
        Duration::from_secs(self.tuning.token_safety_margin_secs)
    }
}
