//! Bounded retry with per-attempt timeout and exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::session::core::config::{SessionConfig, WriterConfig};
use crate::session::core::errors::{SessionError, SessionResult};

/// Retry behaviour for one kind of sink write.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Budget for each individual attempt.
    pub attempt_timeout: Duration,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Add up to 25% random jitter to each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            attempt_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy for the awaited end-of-session summary write.
    #[must_use]
    pub fn end_of_session(session: &SessionConfig) -> Self {
        Self {
            max_retries: session.end_write_retry_count,
            attempt_timeout: session.end_write_timeout(),
            ..Self::default()
        }
    }

    /// Policy for background per-turn message writes.
    #[must_use]
    pub fn per_turn(session: &SessionConfig, writer: &WriterConfig) -> Self {
        Self {
            max_retries: writer.per_turn_write_retry_count,
            attempt_timeout: session.per_turn_write_timeout(),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// First attempt plus retries.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let secs = if self.jitter {
            capped * (1.0 + 0.25 * rand::thread_rng().gen_range(0.0..1.0))
        } else {
            capped
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
    }
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Last attempt's result.
    pub result: SessionResult<T>,
    /// Attempts made, first included.
    pub attempts: u32,
}

/// Run `f` until it succeeds, a permanent error occurs or attempts run out.
///
/// Each attempt is bounded by `policy.attempt_timeout`; a timeout counts as a
/// transient failure.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &'static str, mut f: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<T>>,
{
    let after_ms = u64::try_from(policy.attempt_timeout.as_millis()).unwrap_or(u64::MAX);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = match tokio::time::timeout(policy.attempt_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout {
                operation,
                after_ms,
            }),
        };

        match result {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation, attempt = attempts, "Write succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) if !err.is_transient() => {
                warn!(operation, attempt = attempts, error = %err, "Write failed with permanent error");
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                };
            }
            Err(err) if attempts >= policy.max_attempts() => {
                warn!(operation, attempt = attempts, error = %err, "Write failed after max retries");
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                };
            }
            Err(err) => {
                let backoff = policy.backoff(attempts - 1);
                warn!(
                    operation,
                    attempt = attempts,
                    error = %err,
                    backoff_ms = backoff.as_millis(),
                    "Write failed, retrying after backoff"
                );
                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            attempt_timeout: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let outcome = with_retry(&fast_policy(2), "write_summary", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SessionError::Sink("503".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let outcome: RetryOutcome<()> = with_retry(&fast_policy(1), "write_summary", || async {
            Err(SessionError::Sink("down".to_string()))
        })
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let outcome: RetryOutcome<()> = with_retry(&fast_policy(5), "write_summary", || async {
            Err(SessionError::InvalidConfig("bad".to_string()))
        })
        .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_reported() {
        let outcome: RetryOutcome<()> = with_retry(&fast_policy(0), "write_message", || async {
            sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            outcome.result,
            Err(SessionError::Timeout {
                operation: "write_message",
                ..
            })
        ));
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(10), Duration::from_secs(2));
    }

    #[test]
    fn test_policies_follow_config() {
        let session = SessionConfig::default();
        let end = RetryPolicy::end_of_session(&session);
        assert_eq!(end.max_attempts(), 2);
        assert_eq!(end.attempt_timeout, Duration::from_millis(5000));

        let turn = RetryPolicy::per_turn(&session, &WriterConfig::default());
        assert_eq!(turn.max_attempts(), 1);
        assert_eq!(turn.attempt_timeout, Duration::from_millis(2000));
    }
}
