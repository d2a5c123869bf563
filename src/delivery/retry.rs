// backupengine/src/delivery/retry.rs
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffGrowth {
    Fixed,
    Exponential,
}

/// Per-destination retry policy.
///
/// `max_attempts` bounds the *total* number of store attempts; the delay
/// curve is monotonically non-decreasing and capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    growth: BackoffGrowth,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            growth: BackoffGrowth::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        growth: BackoffGrowth,
    ) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            growth,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before re-attempting after failed attempt number `attempt`
    /// (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = match self.growth {
            BackoffGrowth::Fixed => base_ms,
            BackoffGrowth::Exponential => {
                base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            }
        };
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_per_attempt() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(60),
            BackoffGrowth::Exponential,
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_fixed_stays_flat() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(250),
            Duration::from_secs(60),
            BackoffGrowth::Fixed,
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(4), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(
            30,
            Duration::from_secs(5),
            Duration::from_secs(60),
            BackoffGrowth::Exponential,
        );
        assert_eq!(policy.delay_for(20), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_never_decreases() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = RetryPolicy::new(
            0,
            Duration::from_millis(1),
            Duration::from_millis(1),
            BackoffGrowth::Fixed,
        );
        assert_eq!(policy.max_attempts(), 1);
    }
}
