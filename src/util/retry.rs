//! Retry with exponential backoff and jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::auth::AuthError;
use crate::error::{ErrorCategory, PpcError};

/// Errors the policy knows how to classify.
pub trait Retryable {
    fn category(&self) -> ErrorCategory;

    /// Server-provided minimum delay before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for PpcError {
    fn category(&self) -> ErrorCategory {
        PpcError::category(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        PpcError::retry_after(self)
    }
}

impl Retryable for AuthError {
    fn category(&self) -> ErrorCategory {
        AuthError::category(self)
    }
}

/// Inputs of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    pub category: ErrorCategory,
    /// Attempts made so far, including the one that just failed (1-based).
    pub attempt: u32,
    /// Time spent since the first attempt started.
    pub elapsed: Duration,
    pub retry_after: Option<Duration>,
    /// Whether resubmitting cannot duplicate side effects.
    pub replay_safe: bool,
}

impl RetryContext {
    pub fn for_error<E: Retryable>(error: &E, attempt: u32, elapsed: Duration) -> Self {
        Self {
            category: error.category(),
            attempt,
            elapsed,
            retry_after: error.retry_after(),
            replay_safe: true,
        }
    }

    pub fn replay_safe(mut self, replay_safe: bool) -> Self {
        self.replay_safe = replay_safe;
        self
    }
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The error class is not transient.
    Terminal,
    /// The call could create duplicates if resubmitted.
    NotIdempotent,
    AttemptsExhausted,
    ElapsedExceeded,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Upper bound on total time spent retrying.
    pub max_elapsed: Duration,
    /// Relative jitter; 0.25 spreads delays over 75%–125% of the backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(120),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decide whether to retry, drawing the jitter sample at random.
    pub fn should_retry(&self, ctx: &RetryContext) -> RetryDecision {
        self.decide(ctx, rand::random::<f64>())
    }

    /// Pure retry decision; `sample` in `[0, 1)` drives the jitter.
    pub fn decide(&self, ctx: &RetryContext, sample: f64) -> RetryDecision {
        if !ctx.category.is_transient() {
            return RetryDecision::GiveUp(GiveUpReason::Terminal);
        }
        if !ctx.replay_safe {
            return RetryDecision::GiveUp(GiveUpReason::NotIdempotent);
        }
        if ctx.attempt >= self.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted);
        }
        let backoff = self.backoff(ctx.attempt, sample);
        let delay = match ctx.retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };
        if ctx.elapsed + delay > self.max_elapsed {
            return RetryDecision::GiveUp(GiveUpReason::ElapsedExceeded);
        }
        RetryDecision::RetryAfter(delay)
    }

    /// Backoff before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base = (self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_backoff.as_secs_f64());
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 - jitter + 2.0 * jitter * sample.clamp(0.0, 1.0);
        Duration::from_secs_f64((base * factor).min(self.max_backoff.as_secs_f64()).max(0.0))
    }

    /// Execute a replay-safe async operation with retry.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let started = tokio::time::Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let ctx = RetryContext::for_error(&e, attempt, started.elapsed());
                    match self.should_retry(&ctx) {
                        RetryDecision::RetryAfter(delay) => {
                            tracing::warn!(
                                attempt,
                                max_attempts = self.max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Retrying after error"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp(_) => return Err(e),
                    }
                }
            }
        }
    }
}
