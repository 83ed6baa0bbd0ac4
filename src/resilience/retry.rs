// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exponential backoff.
//!
//! Two uses share one delay rule, `min(initial * factor^n, max)`:
//! - [`retry`] wraps a single fallible operation (opening the queue store).
//! - [`RetryConfig::delay_for_attempt`] gives the sync worker its pause
//!   after the n-th consecutive failing pass.
//!
//! # Example
//!
//! ```
//! use attendance_edge::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on a bad store path
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Sync passes: 1s, 2s, 4s ... capped at 5 minutes
//! let sync = RetryConfig::sync_backoff(Duration::from_secs(1), Duration::from_secs(300));
//! assert_eq!(sync.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(sync.delay_for_attempt(3), Duration::from_secs(8));
//! assert_eq!(sync.delay_for_attempt(20), Duration::from_secs(300));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::SyncConfig;

/// Backoff parameters.
///
/// Presets:
/// - [`RetryConfig::startup()`] - fast-fail for opening local stores
/// - [`RetryConfig::sync_backoff()`] - unbounded, for the sync loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// `None` retries forever
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sync_backoff(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl From<&SyncConfig> for RetryConfig {
    fn from(config: &SyncConfig) -> Self {
        Self::sync_backoff(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_secs(config.max_delay_secs),
        )
    }
}

impl RetryConfig {
    /// Five attempts, roughly three seconds in total. A store that is merely
    /// busy comes up; a wrong path or permissions problem surfaces quickly.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Doubling delay between sync passes, never giving up.
    #[must_use]
    pub fn sync_backoff(base: Duration, max: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay: base,
            max_delay: max,
            factor: 2.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before attempt `attempt + 1`, where attempt 0 is the first retry.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retry budget is spent.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts: usize = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, attempts, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if config.max_retries.is_some_and(|max| attempts >= max) {
                    return Err(err);
                }

                let delay = config.delay_for_attempt(u32::try_from(attempts - 1).unwrap_or(u32::MAX));
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = ?config.max_retries,
                    error = %err,
                    ?delay,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> =
            retry("open", &RetryConfig::test(), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<i32, TestError> = retry("open", &RetryConfig::test(), || {
            let a = counter.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(TestError(format!("busy {count}")))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<i32, TestError> = retry("open", &RetryConfig::test(), || {
            let a = counter.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(TestError("read-only filesystem".to_string()))
            }
        })
        .await;

        assert!(result.unwrap_err().0.contains("read-only"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let config = RetryConfig::sync_backoff(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_from_sync_config() {
        let config = RetryConfig::from(&SyncConfig::default());
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(300));
        assert!(config.max_retries.is_none());
    }
}
