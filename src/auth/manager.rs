//! Access-token lifecycle with single-flight refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::credential::CredentialStore;
use super::error::AuthError;
use super::oauth::LwaClient;
use super::token::AccessToken;

/// Default remaining lifetime a returned token must have.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 60;

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, AuthError>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

struct Inner {
    credentials: Arc<CredentialStore>,
    oauth: LwaClient,
    safety_margin: Duration,
    inflight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

/// Hands out access tokens, refreshing them when they are about to expire.
///
/// At most one refresh exchange is in flight; callers arriving while it runs
/// await the same future and observe the same outcome. Cloning is cheap and
/// shares state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.inner.credentials)
            .field("safety_margin", &self.inner.safety_margin)
            .field("refreshing", &self.inner.inflight.lock().is_some())
            .finish()
    }
}

impl TokenManager {
    pub fn new(credentials: Arc<CredentialStore>, oauth: LwaClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                oauth,
                safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
                inflight: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Minimum remaining lifetime of tokens returned by [`ensure_valid_token`](Self::ensure_valid_token).
    ///
    /// Must be called before the manager is cloned.
    pub fn with_safety_margin(mut self, margin: std::time::Duration) -> Self {
        let margin = Duration::from_std(margin)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS));
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.safety_margin = margin,
            None => tracing::warn!("Token manager already shared; safety margin unchanged"),
        }
        self
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    /// Return a token valid for at least the safety margin, refreshing if needed.
    pub async fn ensure_valid_token(&self) -> Result<AccessToken, AuthError> {
        let pending = {
            let mut slot = self.inner.inflight.lock();
            if let Some(token) = self.inner.fresh_cached() {
                return Ok(token);
            }
            match slot.as_ref() {
                Some(inflight) => inflight.future.clone(),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = Inner::refresh_task(Arc::clone(&self.inner), id);
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        pending.await
    }

    /// Discard `stale` (rejected by the API) and obtain a replacement.
    ///
    /// When several callers report the same stale token only one refresh runs.
    pub async fn force_refresh(&self, stale: &AccessToken) -> Result<AccessToken, AuthError> {
        if self.inner.credentials.invalidate_access(stale) {
            tracing::debug!("Access token rejected by API; invalidated");
        }
        self.ensure_valid_token().await
    }
}

impl Inner {
    fn fresh_cached(&self) -> Option<AccessToken> {
        self.credentials
            .cached_access()
            .filter(|token| token.is_valid_for(self.safety_margin, Utc::now()))
    }

    fn refresh_task(inner: Arc<Inner>, id: u64) -> RefreshFuture {
        async move {
            let result = inner.refresh_once().await;
            let mut slot = inner.inflight.lock();
            if slot.as_ref().map(|inflight| inflight.id) == Some(id) {
                *slot = None;
            }
            result
        }
        .boxed()
        .shared()
    }

    async fn refresh_once(&self) -> Result<AccessToken, AuthError> {
        if self.credentials.is_revoked() {
            return Err(AuthError::Revoked(
                "refresh token was previously rejected".to_string(),
            ));
        }
        let refresh_token = self
            .credentials
            .refresh_token()
            .ok_or(AuthError::MissingRefreshToken)?;
        let client = self.credentials.client();
        match self.oauth.refresh(client, &refresh_token).await {
            Ok(grant) => {
                let expires_in = grant.expires_in.num_seconds();
                let token = self.credentials.apply_grant(grant);
                tracing::info!(client_id = %client.client_id, expires_in, "Refreshed access token");
                Ok(token)
            }
            Err(err @ AuthError::Revoked(_)) => {
                tracing::warn!(client_id = %client.client_id, error = %err, "Refresh token revoked");
                self.credentials.mark_revoked();
                Err(err)
            }
            Err(err) => {
                tracing::warn!(client_id = %client.client_id, error = %err, "Token refresh failed");
                Err(err)
            }
        }
    }
}
