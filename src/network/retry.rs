//! Exponential backoff policy for recovery fetches.
//!
//! ```text
//! delay = min(base_delay * multiplier^retry, max_delay) + jitter
//! ```
//!
//! `retry` is the zero-based ordinal of the retry about to happen, so with the
//! defaults the waits are 1s, 2s, 4s.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::NetworkErrorKind;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Ordinal of the retry about to run (1-indexed).
        retry: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings and no jitter.
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_multiplier: backoff_multiplier.max(1.0),
            max_jitter: Duration::ZERO,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Returns a copy with a different retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns a copy that adds up to `max_jitter` of random delay per retry.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides whether to retry after `retries_done` retries have already run.
    #[instrument(level = "trace", skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, kind: NetworkErrorKind, retries_done: u32) -> RetryDecision {
        if kind == NetworkErrorKind::CorsLike {
            return RetryDecision::DoNotRetry {
                reason: "policy-level block - retry would not help".to_string(),
            };
        }

        if retries_done >= self.max_retries {
            debug!(retries_done, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(retries_done),
            retry: retries_done + 1,
        }
    }

    /// Backoff for the zero-based retry ordinal, without jitter beyond the cap.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = base_ms * self.backoff_multiplier.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(policy.max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_multiplier_below_one_is_clamped() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 0.5);
        assert_eq!(policy.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(200));
        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_cors_like_never_retried() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(NetworkErrorKind::CorsLike, 0);
        assert!(matches!(decision, RetryDecision::DoNotRetry { ref reason } if reason.contains("policy")));
    }

    #[test]
    fn test_retryable_kinds_retry_until_budget() {
        let policy = RetryPolicy::default();
        for kind in [
            NetworkErrorKind::Timeout,
            NetworkErrorKind::ConnectionFailure,
            NetworkErrorKind::ServerError,
            NetworkErrorKind::Unknown,
        ] {
            assert_eq!(
                policy.should_retry(kind, 0),
                RetryDecision::Retry {
                    delay: Duration::from_secs(1),
                    retry: 1
                }
            );
            assert!(matches!(
                policy.should_retry(kind, 3),
                RetryDecision::DoNotRetry { .. }
            ));
        }
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert!(matches!(
            policy.should_retry(NetworkErrorKind::ServerError, 0),
            RetryDecision::DoNotRetry { ref reason } if reason.contains("exhausted")
        ));
    }
}
