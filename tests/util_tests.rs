//! Tests for utility modules (retry, deadlines).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use amazon_ppc::auth::AuthError;
use amazon_ppc::error::PpcError;
use amazon_ppc::util::retry::RetryPolicy;
use amazon_ppc::util::timeout::{deadline_after, with_deadline};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(100),
        multiplier: 2.0,
        max_elapsed: Duration::from_secs(60),
        jitter: 0.0,
    }
}

#[tokio::test(start_paused = true)]
async fn retry_policy_retries_retryable_errors_until_success() {
    let policy = fast_policy(4);
    let attempts = Arc::new(AtomicUsize::new(0));
    let started = tokio::time::Instant::now();

    let result = policy
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(PpcError::Timeout(100))
                } else {
                    Ok::<_, PpcError>("ok")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(200));
}

#[tokio::test]
async fn retry_policy_stops_immediately_for_non_retryable_errors() {
    let policy = fast_policy(5);
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = policy
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AuthError::Revoked("invalid_grant".to_string()))
            }
        })
        .await;

    match result {
        Err(AuthError::Revoked(message)) => assert_eq!(message, "invalid_grant"),
        other => panic!("expected revoked error, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_returns_last_error_when_attempts_are_exhausted() {
    let policy = fast_policy(3);
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = policy
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PpcError::RateLimited {
                    retry_after_ms: None,
                })
            }
        })
        .await;

    match result {
        Err(PpcError::RateLimited { retry_after_ms }) => assert_eq!(retry_after_ms, None),
        other => panic!("expected rate limit error, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_stretches_the_backoff() {
    let policy = fast_policy(2);
    let attempts = Arc::new(AtomicUsize::new(0));
    let started = tokio::time::Instant::now();

    let result = policy
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PpcError::RateLimited {
                        retry_after_ms: Some(2_000),
                    })
                } else {
                    Ok::<_, PpcError>(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn deadline_cuts_a_retry_loop_short() {
    let policy = fast_policy(100);
    let deadline = deadline_after(Some(Duration::from_millis(350)));

    let result = with_deadline(deadline, async {
        policy
            .execute(|| async { Err::<(), _>(PpcError::server(503, "down", None)) })
            .await
    })
    .await;

    assert!(matches!(result, Err(PpcError::Timeout(350))), "{result:?}");
}
