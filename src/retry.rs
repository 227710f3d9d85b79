//! Retry policy applied uniformly around external calls.
//!
//! One policy object covers both the analysis and embedding calls: a fixed
//! number of attempts with exponential backoff between them. Transient
//! errors are retried; an invalid response stops immediately so no quota is
//! burned re-asking a deterministically-bad question.

use std::future::Future;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Attempts and backoff schedule for one external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts made before giving up.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles (by `multiplier`) after each.
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_initial_delay(),
            multiplier: config.retry_multiplier,
        }
    }

    /// Backoff before attempt `attempt + 1`, given 1-based `attempt` just
    /// failed: initial_delay * multiplier^(attempt - 1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }

    /// Run `op` up to `max_retries` times, sleeping between attempts.
    ///
    /// Returns the first success, the first non-retryable error, or the last
    /// transient error once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut last_err = None;

        for attempt in 1..=self.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.delay_after(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::Transient("retries exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 2,
        }
    }

    #[test]
    fn backoff_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn transient_failure_calls_exactly_max_retries_times() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::Transient("rate limited".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_response_stops_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::InvalidResponse("missing field".into())) }
            })
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PipelineError::Transient("timeout".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
