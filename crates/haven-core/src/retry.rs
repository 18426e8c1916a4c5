//! Retry policy shared by the dispatcher and the sync worker
//!
//! Both actors consult the same policy so the abandonment threshold
//! lives in exactly one place.

use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Decides when a queued item is retried and when it is abandoned.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Whether an item that has now failed `attempts` times should be
    /// retried on a later sweep.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// The retry count an item carries after one more failed attempt.
    #[must_use]
    pub const fn next_retry_count(&self, current: u32) -> u32 {
        current.saturating_add(1)
    }

    /// Delay before the next watch-loop sweep after `attempts` failures.
    ///
    /// Capped exponential step so a flapping network does not hammer
    /// the endpoint.
    #[must_use]
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.min(8));
        (BASE_BACKOFF * factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandons_after_three_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn retry_count_increments_without_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_retry_count(0), 1);
        assert_eq!(policy.next_retry_count(2), 3);
        assert_eq!(policy.next_retry_count(u32::MAX), u32::MAX);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(40));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(60));
    }
}
