//! Bounded retry with exponential backoff
//!
//! Only transient control-plane errors are retried. Authentication and
//! other permanent errors fail on the first attempt. Every retry is logged.

use crate::error::ControlPlaneError;
use backoff::future::retry_notify;
use backoff::{Error as BackoffError, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential schedule without jitter and without an elapsed-time cap;
    /// `max_attempts` bounds the retries instead
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        let initial_interval = Duration::from_millis(self.initial_backoff_ms);
        ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: Duration::from_millis(self.max_backoff_ms),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, ControlPlaneError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlPlaneError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    let call = || {
        attempt += 1;
        let last = attempt >= max_attempts;
        let fut = op();
        async move {
            fut.await.map_err(|e| {
                if e.is_transient() && !last {
                    BackoffError::transient(e)
                } else {
                    BackoffError::permanent(e)
                }
            })
        }
    };
    let log_retry = |error: ControlPlaneError, wait: Duration| {
        tracing::warn!(
            operation,
            max_attempts,
            backoff_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "transient control-plane error, retrying"
        );
    };

    let result = retry_notify(policy.backoff(), call, log_retry).await;
    if let Err(e) = &result {
        if e.is_auth() {
            tracing::error!(operation, error = %e, "authentication rejected, not retrying");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn schedule_follows_policy() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            ..RetryPolicy::default()
        };
        let schedule = policy.backoff();
        assert_eq!(schedule.initial_interval, Duration::from_millis(100));
        assert_eq!(schedule.max_interval, Duration::from_secs(30));
        assert!(schedule.randomization_factor.abs() < f64::EPSILON);
        assert!(schedule.max_elapsed_time.is_none());
    }

    #[test]
    fn schedule_grows_then_caps() {
        let policy = RetryPolicy {
            initial_backoff_ms: 10_000,
            max_backoff_ms: 30_000,
            ..RetryPolicy::default()
        };
        let mut schedule = policy.backoff();
        let waits: Vec<Duration> = (0..5).filter_map(|_| schedule.next_backoff()).collect();
        assert_eq!(waits.len(), 5);
        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert!(waits[0] >= Duration::from_secs(10));
        assert!(waits.iter().all(|w| *w <= Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&RetryPolicy::default(), "list_hosts", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ControlPlaneError::Unreachable("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&RetryPolicy::default(), "stop", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ControlPlaneError::Auth("401".into())) }
        })
        .await;
        assert!(result.unwrap_err().is_auth());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = retry_transient(&policy, "health", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ControlPlaneError::Timeout("slow".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
