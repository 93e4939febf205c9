//! The credential store: the single owner of client and token secrets.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::error::AuthError;
use super::store::TokenStore;
use super::token::{AccessToken, Secret, Token};

/// Application credentials registered with Login with Amazon.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret,
    pub redirect_uri: Option<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Tokens granted by the authorization server.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret,
    /// Present when the server rotated the refresh token.
    pub refresh_token: Option<Secret>,
    pub token_type: Option<String>,
    pub expires_in: Duration,
}

#[derive(Default)]
struct CredentialState {
    refresh_token: Option<Secret>,
    access: Option<AccessToken>,
    token_type: Option<String>,
    last_refresh: Option<DateTime<Utc>>,
    revoked: bool,
}

/// Lock-protected owner of the credential.
///
/// Only the token manager mutates it (through [`apply_grant`](Self::apply_grant),
/// [`invalidate_access`](Self::invalidate_access) and
/// [`mark_revoked`](Self::mark_revoked)); everything else reads.
pub struct CredentialStore {
    client: ClientCredentials,
    state: RwLock<CredentialState>,
    persistence: Option<Arc<dyn TokenStore>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("CredentialStore")
            .field("client", &self.client)
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("access", &state.access)
            .field("revoked", &state.revoked)
            .field("persistence", &self.persistence.as_ref().map(|_| ".."))
            .finish()
    }
}

impl CredentialStore {
    pub fn new(client: ClientCredentials, refresh_token: Option<Secret>) -> Self {
        Self {
            client,
            state: RwLock::new(CredentialState {
                refresh_token,
                ..CredentialState::default()
            }),
            persistence: None,
        }
    }

    /// Persist tokens through `store` after every refresh.
    pub fn with_persistence(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Load a previously persisted token.
    ///
    /// A persisted refresh token wins over the configured one because the
    /// server may have rotated it. An unexpired access token is reused.
    pub fn initialize(&self) -> Result<(), AuthError> {
        let Some(store) = &self.persistence else {
            return Ok(());
        };
        let Some(token) = store.load(&self.client.client_id)? else {
            return Ok(());
        };
        let mut state = self.state.write();
        if let Some(refresh) = token.refresh_token {
            state.refresh_token = Some(refresh);
        }
        if let Some(expires_at) = token.expires_at {
            if expires_at > Utc::now() {
                state.access = Some(AccessToken::new(token.access_token, expires_at));
            }
        }
        state.token_type = token.token_type;
        state.last_refresh = token.last_refresh;
        tracing::debug!(client_id = %self.client.client_id, "Loaded persisted token");
        Ok(())
    }

    pub fn client(&self) -> &ClientCredentials {
        &self.client
    }

    pub fn refresh_token(&self) -> Option<Secret> {
        self.state.read().refresh_token.clone()
    }

    pub fn cached_access(&self) -> Option<AccessToken> {
        self.state.read().access.clone()
    }

    pub fn is_revoked(&self) -> bool {
        self.state.read().revoked
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_refresh
    }

    /// Replace the access token (and a rotated refresh token) in one step.
    ///
    /// The new token is usable even when persisting it fails; the failure is
    /// logged and the file is rewritten on the next refresh or teardown.
    pub fn apply_grant(&self, grant: TokenGrant) -> AccessToken {
        let now = Utc::now();
        let access = AccessToken::new(grant.access_token, now + grant.expires_in);
        {
            let mut state = self.state.write();
            if let Some(refresh) = grant.refresh_token {
                state.refresh_token = Some(refresh);
            }
            state.access = Some(access.clone());
            state.token_type = grant.token_type;
            state.last_refresh = Some(now);
            state.revoked = false;
        }
        if let Err(err) = self.persist() {
            tracing::warn!(
                client_id = %self.client.client_id,
                error = %err,
                "Failed to persist refreshed token"
            );
        }
        access
    }

    /// Drop the cached access token if it is still `stale`.
    ///
    /// Returns `false` when another caller already replaced it.
    pub fn invalidate_access(&self, stale: &AccessToken) -> bool {
        let mut state = self.state.write();
        if state.access.as_ref() == Some(stale) {
            state.access = None;
            true
        } else {
            false
        }
    }

    pub fn mark_revoked(&self) {
        let mut state = self.state.write();
        state.revoked = true;
        state.access = None;
    }

    /// Install a fresh refresh token, e.g. after the user re-authorized.
    pub fn replace_refresh_token(&self, refresh_token: Secret) -> Result<(), AuthError> {
        {
            let mut state = self.state.write();
            state.refresh_token = Some(refresh_token);
            state.access = None;
            state.revoked = false;
        }
        self.persist()
    }

    /// Persist the current token and forget the access token in memory.
    pub fn teardown(&self) -> Result<(), AuthError> {
        self.persist()?;
        self.state.write().access = None;
        Ok(())
    }

    /// Forget every token, in memory and in persistence.
    pub fn revoke(&self) -> Result<(), AuthError> {
        {
            let mut state = self.state.write();
            state.refresh_token = None;
            state.access = None;
            state.revoked = true;
        }
        if let Some(store) = &self.persistence {
            store.clear(&self.client.client_id)?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), AuthError> {
        let Some(store) = &self.persistence else {
            return Ok(());
        };
        let token = {
            let state = self.state.read();
            Token {
                access_token: state
                    .access
                    .as_ref()
                    .map(|access| Secret::new(access.secret()))
                    .unwrap_or_else(|| Secret::new("")),
                refresh_token: state.refresh_token.clone(),
                token_type: state.token_type.clone(),
                expires_at: state.access.as_ref().map(AccessToken::expires_at),
                last_refresh: state.last_refresh,
            }
        };
        store.save(&self.client.client_id, &token)
    }
}
