//! Retry policy for the remote editor's HTTP calls: exponential backoff with
//! jitter and retryable/non-retryable status classification.

use std::time::Duration;

use rand::Rng;

/// Marker wrapping a non-retryable failure so callers can `downcast` through
/// `unwrap` and tell "gave up after retries" apart from "server said don't bother".
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct NonRetryable(pub anyhow::Error);

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_retries: 3,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

impl RetryPolicy {
    /// Attempt `i > 0` sleeps `base * 2^(i-1)` with +/-10% jitter; attempt 0
    /// sleeps 0 (no wait before the first try).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt - 1;
        let nominal = self.base.as_secs_f64() * 2f64.powi(exponent as i32);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_secs_f64(nominal * jitter)
    }

    /// Runs `op` up to `max_retries + 1` times, sleeping per
    /// `backoff_for_attempt` between attempts, honoring `cancel` during the
    /// sleep. `classify` maps an error to "retryable" (continue) or
    /// "non-retryable" (stop immediately).
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        mut op: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, RetryOutcome>>,
    {
        let mut attempt = 0u32;
        loop {
            let sleep = self.backoff_for_attempt(attempt);
            if !sleep.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(anyhow::anyhow!("retry cancelled during backoff sleep"));
                    }
                    _ = tokio::time::sleep(sleep) => {}
                }
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(RetryOutcome::NonRetryable(err)) => {
                    return Err(NonRetryable(err).into());
                }
                Err(RetryOutcome::Retryable(err)) => {
                    if attempt >= self.max_retries {
                        tracing::error!(error = ?err, attempt, "editor request failed after exhausting retries");
                        return Err(err);
                    }
                    tracing::warn!(error = ?err, attempt, "editor request failed, retrying");
                    attempt += 1;
                }
            }
        }
    }
}

pub enum RetryOutcome {
    Retryable(anyhow::Error),
    NonRetryable(anyhow::Error),
}

/// Classifies an HTTP response status per the component design: 200 is
/// success (not reached here), 408/429/5xx retryable, 400/401/404 and
/// everything else non-retryable.
pub fn classify_status(status: u16, body_snippet: &str) -> RetryOutcome {
    let err = anyhow::anyhow!("editor returned status {status}: {body_snippet}");
    if is_retryable_status(status) {
        RetryOutcome::Retryable(err)
    } else {
        RetryOutcome::NonRetryable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_zero_sleeps_zero() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_band() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            max_retries: 5,
        };
        for attempt in 1..=4 {
            let nominal = 0.1 * 2f64.powi((attempt - 1) as i32);
            let sleep = policy.backoff_for_attempt(attempt).as_secs_f64();
            assert!(sleep >= nominal * 0.9 - 1e-9);
            assert!(sleep <= nominal * 1.1 + 1e-9);
        }
    }

    #[test]
    fn retryable_status_classification() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            max_retries: 5,
        };
        let cancel = tokio_util::sync::CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result = policy
            .run(&cancel, |attempt| {
                let attempts = &attempts;
                async move {
                    attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if attempt < 2 {
                        Err(RetryOutcome::Retryable(anyhow::anyhow!("still failing")))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_stops_immediately_on_non_retryable() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            max_retries: 5,
        };
        let cancel = tokio_util::sync::CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: anyhow::Result<()> = policy
            .run(&cancel, |_attempt| {
                let attempts = &attempts;
                async move {
                    attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Err(RetryOutcome::NonRetryable(anyhow::anyhow!("bad request")))
                }
            })
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().downcast_ref::<NonRetryable>().is_some());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_aborts_the_backoff_sleep() {
        let policy = RetryPolicy {
            base: Duration::from_secs(60),
            max_retries: 5,
        };
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();

        let result: anyhow::Result<()> = policy
            .run(&cancel, |attempt| async move {
                if attempt == 0 {
                    Err(RetryOutcome::Retryable(anyhow::anyhow!("fails once")))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_err());
    }
}
