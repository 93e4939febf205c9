//! Request gateway: authentication, admission control, dispatch and
//! outcome classification for resource calls.

pub mod http;
pub mod rate_limit;

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::api::{endpoint_path, ApiCall, Scope};
use crate::auth::{AccessToken, AuthError, TokenManager};
use crate::config::RateLimitSettings;
use crate::error::PpcError;
use crate::util::retry::{GiveUpReason, RetryContext, RetryDecision, RetryPolicy};
use crate::util::timeout::with_deadline;

pub use http::{StatusClass, CLIENT_ID_HEADER, IDEMPOTENCY_KEY_HEADER};
pub use rate_limit::{partition_key, Permit, RateLimiter, TokenBucket};

/// Per-dispatch options.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Give up (admission included) at this instant.
    pub deadline: Option<Instant>,
}

impl DispatchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }
}

/// Successful (2xx/207) answer of a resource endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Decoded JSON body; `Null` for an empty body.
    pub body: Value,
    pub request_id: Option<String>,
}

/// Sends [`ApiCall`]s to the Advertising API.
///
/// Each call is authenticated with a token from the [`TokenManager`], admitted
/// against its partition's rate budget, and retried under the configured
/// [`RetryPolicy`] when the failure is transient and the call is replay-safe.
#[derive(Debug)]
pub struct RequestGateway {
    http: reqwest::Client,
    base_url: String,
    scope: Scope,
    tokens: TokenManager,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl RequestGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        scope: Scope,
        tokens: TokenManager,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            scope,
            tokens,
            limiter: RateLimiter::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_rate_limits(mut self, settings: RateLimitSettings) -> Self {
        self.limiter = RateLimiter::new(settings);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Send `call`, retrying transient failures.
    ///
    /// When the deadline elapses mid-call the request future is dropped and
    /// the admission permit is refunded.
    pub async fn dispatch(
        &self,
        call: &ApiCall,
        options: &DispatchOptions,
    ) -> Result<RawResponse, PpcError> {
        with_deadline(options.deadline, self.dispatch_with_retry(call, options.deadline)).await
    }

    async fn dispatch_with_retry(
        &self,
        call: &ApiCall,
        deadline: Option<Instant>,
    ) -> Result<RawResponse, PpcError> {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.attempt(call, deadline).await {
                Ok(response) => return Ok(response),
                // Admission already waited as long as the deadline allows.
                Err(err @ PpcError::RateLimitTimeout { .. }) => return Err(err),
                Err(err) => err,
            };

            let ctx = RetryContext::for_error(&err, attempt, started.elapsed())
                .replay_safe(call.is_replay_safe());
            match self.retry.should_retry(&ctx) {
                RetryDecision::RetryAfter(delay) => {
                    if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
                        return Err(finalize(err));
                    }
                    tracing::warn!(
                        resource = %call.resource,
                        action = %call.action,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying resource call"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp(GiveUpReason::NotIdempotent) => {
                    tracing::warn!(
                        resource = %call.resource,
                        action = %call.action,
                        error = %err,
                        "Not retrying create without an idempotency key"
                    );
                    return Err(PpcError::UnsafeRetry {
                        resource: call.resource,
                        action: call.action,
                        cause: Box::new(err),
                    });
                }
                RetryDecision::GiveUp(_) => return Err(finalize(err)),
            }
        }
    }

    /// One logical attempt, including a single resend after a 401/403.
    async fn attempt(
        &self,
        call: &ApiCall,
        deadline: Option<Instant>,
    ) -> Result<RawResponse, PpcError> {
        let mut token = self.tokens.ensure_valid_token().await?;
        let mut refreshed = false;

        loop {
            let (status, headers, body) = self.send(call, &token, deadline).await?;
            let request_id = http::request_id(&headers);

            match http::classify(status) {
                StatusClass::Success => {
                    let body = if body.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&body).map_err(|err| {
                            PpcError::InvalidResponse(format!(
                                "{} {} returned malformed JSON: {err}",
                                call.action, call.resource
                            ))
                        })?
                    };
                    return Ok(RawResponse {
                        status,
                        body,
                        request_id,
                    });
                }
                StatusClass::Unauthorized if !refreshed => {
                    tracing::info!(
                        status,
                        resource = %call.resource,
                        "Access token rejected; refreshing once"
                    );
                    token = self.tokens.force_refresh(&token).await?;
                    refreshed = true;
                }
                StatusClass::Unauthorized => {
                    let error = http::parse_error_body(&body, request_id);
                    return Err(AuthError::AccessDenied(format!(
                        "HTTP {status}: {}",
                        error.message
                    ))
                    .into());
                }
                StatusClass::RateLimited => {
                    let retry_after = http::parse_retry_after(&headers);
                    let hint = http::parse_rate_limit_hint(&headers);
                    let partition = partition_key(call.resource, &self.scope);
                    self.limiter.bucket(&partition).penalize(retry_after, hint);
                    tracing::debug!(
                        partition = %partition,
                        retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                        limit = hint,
                        "Throttled by provider"
                    );
                    return Err(PpcError::RateLimited {
                        retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
                    });
                }
                StatusClass::Server => {
                    let error = http::parse_error_body(&body, request_id);
                    return Err(PpcError::server(status, error.message, Some(error.details)));
                }
                StatusClass::Client => {
                    let error = http::parse_error_body(&body, request_id);
                    return Err(PpcError::Validation {
                        resource: Some(call.resource),
                        action: Some(call.action),
                        status: Some(status),
                        message: error.message,
                        item_index: error.item_index,
                    });
                }
            }
        }
    }

    /// Admit and send one HTTP request, returning status, headers and body text.
    async fn send(
        &self,
        call: &ApiCall,
        token: &AccessToken,
        deadline: Option<Instant>,
    ) -> Result<(u16, reqwest::header::HeaderMap, String), PpcError> {
        let partition = partition_key(call.resource, &self.scope);
        let permit = self.limiter.bucket(&partition).acquire(deadline).await?;

        let client_id = &self.tokens.credentials().client().client_id;
        let headers = http::request_headers(
            token,
            client_id,
            &self.scope,
            call.idempotency_key.as_deref(),
        )?;
        let url = format!("{}{}", self.base_url, endpoint_path(call.resource, call.action));

        tracing::debug!(
            resource = %call.resource,
            action = %call.action,
            items = call.item_count,
            partition = %partition,
            "Dispatching resource call"
        );
        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&call.body)
            .send()
            .await?;
        permit.commit();

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok((status, headers, body))
    }
}

/// Shape the error surfaced once retries stop.
fn finalize(err: PpcError) -> PpcError {
    match err {
        PpcError::Network(err) if !err.is_timeout() => PpcError::Transport {
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
            details: None,
        },
        other => other,
    }
}
