use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::token::Token;

/// Storage abstraction for persisted OAuth tokens, keyed by client id.
pub trait TokenStore: Send + Sync {
    fn load(&self, client_id: &str) -> Result<Option<Token>, AuthError>;
    fn save(&self, client_id: &str, token: &Token) -> Result<(), AuthError>;
    fn clear(&self, client_id: &str) -> Result<(), AuthError>;
}

/// Configuration for file-backed token storage.
#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub base_dir: PathBuf,
}

impl TokenStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_token_dir()
    }
}

/// File-backed token store using TOML files readable only by the owner.
///
/// # Example
/// ```no_run
/// use amazon_ppc::auth::{FileTokenStore, Secret, Token, TokenStore};
///
/// let store = FileTokenStore::new_default();
/// let token = Token {
///     access_token: Secret::new("access"),
///     refresh_token: Some(Secret::new("refresh")),
///     token_type: None,
///     expires_at: None,
///     last_refresh: None,
/// };
/// store.save("amzn1.application-oa2-client.abc", &token)?;
/// # Ok::<(), amazon_ppc::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(config: TokenStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_token_dir(),
        }
    }

    fn token_path(&self, client_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.toml", normalize_label(client_id)))
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, client_id: &str) -> Result<Option<Token>, AuthError> {
        let path = self.token_path(client_id);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: TokenFile = toml::from_str(&raw)?;
        if file.client_id != client_id {
            tracing::warn!(path = %path.display(), "Token file belongs to another client; ignoring");
            return Ok(None);
        }
        Ok(Some(file.token))
    }

    fn save(&self, client_id: &str, token: &Token) -> Result<(), AuthError> {
        let path = self.token_path(client_id);
        Self::ensure_parent(&path)?;
        let file = TokenFile {
            version: 1,
            client_id: client_id.to_string(),
            token: token.clone(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self, client_id: &str) -> Result<(), AuthError> {
        let path = self.token_path(client_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    client_id: String,
    token: Token,
    saved_at: DateTime<Utc>,
}

fn default_token_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".amazon-ppc"))
        .unwrap_or_else(|| PathBuf::from(".amazon-ppc"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' || lower == '.' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches(|c| c == '-' || c == '.').is_empty() {
        "default".to_string()
    } else {
        out
    }
}
