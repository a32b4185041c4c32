//! Fetch resilience: per-source timeout and retry with exponential backoff.
//!
//! Every source query in a run is wrapped in a [`FetchPolicy`]. Transient
//! errors are retried with backoff, and the whole attempt sequence shares a
//! single timeout budget so a slow source resolves (as a failure) in bounded
//! time.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{SourceError, SourceResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial delay before first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base_delay.min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Timeout plus retry policy applied to one source query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    /// Budget for the query including all retries.
    pub timeout: Duration,
    /// Retry behavior for transient errors.
    pub retry: RetryConfig,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
        }
    }
}

impl FetchPolicy {
    /// Create a policy.
    #[must_use]
    pub fn new(timeout: Duration, retry: RetryConfig) -> Self {
        Self { timeout, retry }
    }

    /// Execute a query under this policy.
    ///
    /// Returns [`SourceError::Timeout`] when the budget runs out, whatever
    /// attempt was in flight.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> SourceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        match tokio::time::timeout(self.timeout, self.retry_loop(operation)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn retry_loop<F, Fut, T>(&self, mut operation: F) -> SourceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() || attempt >= self.retry.max_retries {
                        return Err(e);
                    }

                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying source query after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(350));
        assert_eq!(config.delay_for(10), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = FetchPolicy::new(Duration::from_secs(60), RetryConfig::default());

        let counter = calls.clone();
        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(SourceError::unavailable("flaky"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = FetchPolicy::default();

        let counter = calls.clone();
        let result: SourceResult<()> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::AuthenticationFailed)
                }
            })
            .await;

        assert!(matches!(result, Err(SourceError::AuthenticationFailed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = FetchPolicy::new(Duration::from_secs(60), RetryConfig::default());

        let counter = calls.clone();
        let result: SourceResult<()> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::unavailable("down"))
                }
            })
            .await;

        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reported_as_timeout_error() {
        let policy = FetchPolicy::new(Duration::from_secs(5), RetryConfig::none());

        let result: SourceResult<()> = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(SourceError::Timeout { timeout_secs: 5 })));
    }
}
