//! Bounded retry with exponential backoff and jitter.
//!
//! External collaborators (identity, safety classifier, completion
//! model) are all transiently fallible; each gets a small bounded
//! retry before its caller applies the fail-closed / surface policy.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u8,
    /// Base backoff time in milliseconds
    pub base_backoff_ms: u64,
    /// Maximum backoff time in milliseconds
    pub max_backoff_ms: u64,
    /// Jitter range in milliseconds (added to backoff)
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_backoff_ms: 200,
            max_backoff_ms: 2_000,
            jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Backoff before the given retry (1-based attempt that just
    /// failed). Doubles per attempt, capped, plus jitter.
    pub fn backoff_for(&self, failed_attempt: u8) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16) as u32;
        let base = self
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        let jitter = if self.jitter_ms > 0 {
            rand::rng().random_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// Run `op` up to `config.max_attempts` times, sleeping between
/// attempts. Returns the first success or the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u8;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(what, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= config.max_attempts.max(1) => {
                tracing::warn!(what, attempt, error = %e, "operation failed, attempts exhausted");
                return Err(e);
            }
            Err(e) => {
                let wait = config.backoff_for(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u8) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter_ms: 0,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&fast_config(3), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&fast_config(3), "test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&fast_config(2), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 300,
            jitter_ms: 0,
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(300));
        assert_eq!(config.backoff_for(4), Duration::from_millis(300));
    }
}
