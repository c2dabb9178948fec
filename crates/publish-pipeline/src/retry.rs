//! Retry policy with capped exponential backoff.

use std::time::Duration;

/// Attempt cap and backoff settings for failed deliveries.
///
/// # Backoff Calculation
///
/// After attempt `n` fails, the next attempt waits `base_delay * 2^(n-1)`,
/// capped at `max_delay`. With `base_delay = 100ms`:
///
/// | Failed attempt | Delay |
/// |----------------|-------|
/// | 1              | 100ms |
/// | 2              | 200ms |
/// | 3              | 400ms |
/// | ...            | up to `max_delay` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total sends allowed per envelope, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// What to do with an envelope whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend after the given delay.
    RetryAfter(Duration),
    /// Attempts exhausted; fail permanently.
    GiveUp,
}

impl RetryPolicy {
    /// Decide the fate of an envelope whose `failed_attempt` (1-based) failed.
    pub fn decide(&self, failed_attempt: u32) -> RetryDecision {
        if failed_attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.backoff(failed_attempt))
        }
    }

    /// Delay before resending after `failed_attempt` failed.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let shift = failed_attempt.saturating_sub(1);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(25));
        assert_eq!(policy.backoff(10), Duration::from_millis(25));
    }

    #[test]
    fn backoff_zero_for_no_failures() {
        assert_eq!(policy().backoff(0), Duration::ZERO);
    }

    #[test]
    fn backoff_large_attempt_saturates() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        };
        assert_eq!(policy.backoff(64), Duration::from_secs(300));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn decide_gives_up_at_max_attempts() {
        let policy = policy();
        assert_eq!(
            policy.decide(1),
            RetryDecision::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::RetryAfter(Duration::from_millis(20))
        );
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.decide(1), RetryDecision::GiveUp);
    }
}
