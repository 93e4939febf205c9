//! Deadline helpers.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::PpcError;

/// Run `future` until `deadline`, if any. Dropping the future aborts it.
pub async fn with_deadline<T>(
    deadline: Option<Instant>,
    future: impl Future<Output = Result<T, PpcError>>,
) -> Result<T, PpcError> {
    let Some(deadline) = deadline else {
        return future.await;
    };
    let started = Instant::now();
    match tokio::time::timeout_at(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(PpcError::Timeout(started.elapsed().as_millis() as u64)),
    }
}

/// Deadline `timeout` from now.
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|timeout| Instant::now() + timeout)
}
