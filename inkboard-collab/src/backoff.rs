//! Reconnect delay policies.

use std::time::Duration;

/// Decides how long to wait before reconnect attempt `attempt` (1-based).
/// `None` means give up.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    fn delay(&self, attempt: u32) -> Option<Duration>;

    fn max_attempts(&self) -> u32;
}

/// `base + step * (attempt - 1)`, capped at `max_delay`, for at most
/// `max_attempts` attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearBackoff {
    pub base: Duration,
    pub step: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            step: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl LinearBackoff {
    pub fn new(base: Duration, step: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self { base, step, max_delay, max_attempts }
    }

    /// Short delays for tests.
    pub fn fast(max_attempts: u32) -> Self {
        Self::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(50),
            max_attempts,
        )
    }
}

impl BackoffPolicy for LinearBackoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let grown = self.base.saturating_add(self.step.saturating_mul(attempt - 1));
        Some(grown.min(self.max_delay))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_growth_and_cap() {
        let policy = LinearBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(600),
            5,
        );
        assert_eq!(policy.delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay(2), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay(3), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay(4), Some(Duration::from_millis(600)));
        assert_eq!(policy.delay(5), Some(Duration::from_millis(600)));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = LinearBackoff::fast(2);
        assert!(policy.delay(2).is_some());
        assert_eq!(policy.delay(3), None);
        assert_eq!(policy.delay(0), None);
    }

    #[test]
    fn test_default_is_bounded() {
        let policy = LinearBackoff::default();
        let total: Duration = (1..=policy.max_attempts()).filter_map(|a| policy.delay(a)).sum();
        assert!(total <= Duration::from_secs(60));
        assert_eq!(policy.delay(policy.max_attempts() + 1), None);
    }
}
