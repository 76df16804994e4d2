// src/utils/retry.rs

//! Exponential backoff with jitter and an optional total-time budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::{AppError, Result};

/// Retry knobs. `max_retries` counts retries, not attempts: 2 retries means
/// up to 3 attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_total_time: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_total_time: None,
        }
    }

    pub fn with_total_time(mut self, budget: Duration) -> Self {
        self.max_total_time = Some(budget);
        self
    }
}

/// Jitter added to each backoff: uniform over [0, min(250ms, base)].
fn backoff_jitter(base: Duration) -> Duration {
    let cap = base.min(Duration::from_millis(250));
    if cap.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=cap.as_millis() as u64))
}

/// Run `op` with retries.
///
/// The budget is checked *before* each attempt; an in-flight attempt is never
/// cancelled here (request-level timeouts bound it). If the budget expires
/// before the first attempt completes, a budget error is raised; afterwards
/// the last attempt's error is re-raised.
pub async fn with_retries<T, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&AppError) -> bool,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    let mut last_error: Option<AppError> = None;

    loop {
        if let Some(budget) = policy.max_total_time {
            if started.elapsed() > budget {
                return Err(last_error.take().unwrap_or(AppError::RetryBudget));
            }
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !should_retry(&err) {
                    return Err(err);
                }

                let delay = policy
                    .base_backoff
                    .saturating_mul(2u32.saturating_pow(attempt))
                    + backoff_jitter(policy.base_backoff);

                if let Some(budget) = policy.max_total_time {
                    let remaining = budget.saturating_sub(started.elapsed());
                    if remaining <= delay {
                        return Err(err);
                    }
                }

                tokio::time::sleep(delay).await;
                last_error = Some(err);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<u32> = with_retries(&quick_policy(3), |_| true, move |_| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<&str> = with_retries(&quick_policy(3), |e| e.is_retryable(), move |_| {
            let calls = Arc::clone(&calls_in);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::http(503))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<()> = with_retries(&quick_policy(2), |e| e.is_retryable(), move |_| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::http(500))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<()> = with_retries(&quick_policy(5), |e| e.is_retryable(), move |_| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::http(404))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_stops_before_delay() {
        // Base backoff far larger than the budget: the first failure must be
        // re-raised instead of sleeping past the budget.
        let policy = RetryPolicy::new(5, Duration::from_secs(10))
            .with_total_time(Duration::from_millis(50));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<()> = with_retries(&policy, |_| true, move |_| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::http(503))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_counter_passed_to_op() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _: Result<()> = with_retries(&quick_policy(2), |_| true, move |attempt| {
            let seen = Arc::clone(&seen_in);
            async move {
                seen.lock().unwrap().push(attempt);
                Err(AppError::http(500))
            }
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
