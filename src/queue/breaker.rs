//! Failure circuit breaker for dispatch.
//!
//! Plain state, no locking: it lives inside the queue state and is mutated
//! under that lock. Closing after the cooldown is driven by a timer task owned
//! by the manager, not by polling.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    opened_until: Option<Instant>,
}

impl CircuitBreaker {
    pub(crate) fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            opened_until: None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.opened_until.is_some()
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Counts a failure. Returns `true` when this failure trips the breaker.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.opened_until.is_none() && self.consecutive_failures >= self.threshold {
            self.opened_until = Some(Instant::now() + self.cooldown);
            return true;
        }
        false
    }

    /// Closes the breaker and resets the failure counter.
    pub(crate) fn close(&mut self) {
        self.opened_until = None;
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets_counter() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_failures_while_open_do_not_retrip() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        assert!(breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[test]
    fn test_close_resets() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        breaker.close();
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_zero_threshold_clamped() {
        let mut breaker = CircuitBreaker::new(0, Duration::from_secs(1));
        assert!(breaker.record_failure());
    }
}
