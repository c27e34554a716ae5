use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::config;
use crate::error::FetchError;

/// Bounded retry with exponential backoff on upstream rate limiting and a
/// flat delay on any other failure. Exhaustion yields `None`; the error never
/// reaches the caller.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub flat_delay: Duration,
    pub jitter_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: config::MAX_RETRIES,
            initial_delay: config::INITIAL_RETRY_DELAY,
            flat_delay: config::FLAT_RETRY_DELAY,
            jitter_cap: Duration::from_millis(config::RETRY_JITTER_CAP_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying a rate-limited attempt, excluding jitter.
    /// `attempt` is 1-based, so delays double starting from `initial_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    fn jitter(&self) -> Duration {
        let cap = self.jitter_cap.as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..cap))
    }
}

pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Some(value),
            Err(err) => {
                let rate_limited = err.is_rate_limited();
                last_err = Some(err);
                if attempt == policy.max_attempts {
                    break;
                }
                if rate_limited {
                    let delay = policy.backoff_delay(attempt) + policy.jitter();
                    warn!(
                        "{label}: rate limited on attempt {attempt}, backing off {}ms",
                        delay.as_millis()
                    );
                    sleep(delay).await;
                } else {
                    sleep(policy.flat_delay).await;
                }
            }
        }
    }
    if let Some(err) = last_err {
        error!(
            "{label}: query failed after {} attempts: {err}",
            policy.max_attempts
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            flat_delay: Duration::from_millis(20),
            jitter_cap: Duration::from_millis(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_never_exceed_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Option<u64> = with_retry(fast_policy(), "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::BadResponse("nope".into()))
            }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(fast_policy(), "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(42u64)
            }
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_backoff_is_monotonically_nondecreasing() {
        let stamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let recorder = stamps.clone();
        let _: Option<u64> = with_retry(fast_policy(), "test", move || {
            let recorder = recorder.clone();
            async move {
                recorder.lock().await.push(Instant::now());
                Err(FetchError::RateLimited)
            }
        })
        .await;

        let stamps = stamps.lock().await;
        assert_eq!(stamps.len(), 3);
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(second_gap >= first_gap);
        // First backoff is at least the initial delay, second at least double.
        assert!(first_gap >= Duration::from_millis(100));
        assert!(second_gap >= Duration::from_millis(200));
    }

    #[test]
    fn backoff_delay_doubles_per_attempt() {
        let policy = fast_policy();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }
}
