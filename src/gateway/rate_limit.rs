//! Token-bucket admission control per API partition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::api::{ResourceType, Scope};
use crate::config::RateLimitSettings;
use crate::error::PpcError;

/// Partition key for a resource collection within a scope.
pub fn partition_key(resource: ResourceType, scope: &Scope) -> String {
    format!("{}@{}", resource.collection(), scope)
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    refill_per_sec: f64,
    /// Set after a 429; no capacity is granted before this instant.
    blocked_until: Option<Instant>,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64) {
        if let Some(until) = self.blocked_until {
            if now < until {
                return;
            }
            self.blocked_until = None;
            self.last_refill = self.last_refill.max(until);
        }
        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(capacity);
            self.last_refill = now;
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant, capacity: f64) -> Result<(), Duration> {
        self.refill(now, capacity);
        if let Some(until) = self.blocked_until {
            return Err(until.duration_since(now));
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_per_sec))
    }
}

/// Rate budget of one partition.
///
/// Allows bursts up to `capacity`, then refills continuously at
/// `refill_per_sec`. A provider 429 drains the bucket and may lower the rate.
#[derive(Debug)]
pub struct TokenBucket {
    partition: String,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(partition: impl Into<String>, settings: &RateLimitSettings) -> Self {
        let capacity = f64::from(settings.capacity.max(1));
        Self {
            partition: partition.into(),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                refill_per_sec: settings.refill_per_second.max(f64::EPSILON),
                blocked_until: None,
            }),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Wait for one unit of capacity.
    ///
    /// Fails with [`PpcError::RateLimitTimeout`] as soon as it is clear that
    /// capacity cannot arrive before `deadline`.
    pub async fn acquire(self: &Arc<Self>, deadline: Option<Instant>) -> Result<Permit, PpcError> {
        let started = Instant::now();
        loop {
            let now = Instant::now();
            let wait = match self.state.lock().try_take(now, self.capacity) {
                Ok(()) => {
                    return Ok(Permit {
                        bucket: Arc::clone(self),
                        committed: false,
                    })
                }
                Err(wait) => wait,
            };
            if deadline.is_some_and(|deadline| now + wait > deadline) {
                return Err(PpcError::RateLimitTimeout {
                    partition: self.partition.clone(),
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }
            debug!(
                partition = %self.partition,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limit capacity"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Return one unit of capacity.
    pub fn refund(&self) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + 1.0).min(self.capacity);
    }

    /// React to a 429: drain the bucket, pause until `retry_after` and adopt
    /// the provider's advertised rate if it sent one.
    pub fn penalize(&self, retry_after: Option<Duration>, limit_hint: Option<f64>) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.refill(now, self.capacity);
        state.tokens = 0.0;
        if let Some(rate) = limit_hint.filter(|rate| *rate > 0.0) {
            state.refill_per_sec = rate;
        }
        if let Some(delay) = retry_after {
            let until = now + delay;
            state.blocked_until = Some(state.blocked_until.map_or(until, |b| b.max(until)));
        }
        state.last_refill = now;
    }

    /// Tokens currently available.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(Instant::now(), self.capacity);
        if state.blocked_until.is_some() {
            return 0.0;
        }
        state.tokens
    }

    pub fn refill_rate(&self) -> f64 {
        self.state.lock().refill_per_sec
    }
}

/// One admitted call. Dropping it uncommitted refunds the capacity.
#[derive(Debug)]
pub struct Permit {
    bucket: Arc<TokenBucket>,
    committed: bool,
}

impl Permit {
    /// Keep the capacity consumed: the provider answered.
    pub fn commit(mut self) {
        self.committed = true;
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.committed {
            self.bucket.refund();
        }
    }
}

/// Buckets keyed by partition, created on first use.
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn bucket(&self, partition: &str) -> Arc<TokenBucket> {
        let mut buckets = self.buckets.lock();
        Arc::clone(
            buckets
                .entry(partition.to_string())
                .or_insert_with(|| Arc::new(TokenBucket::new(partition, &self.settings))),
        )
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitSettings::default())
    }
}
