use std::time::Duration;

/// Exponential backoff with a bounded attempt count, applied to tasks a
/// handler reports [`crate::error::HandlerOutcome::Retryable`] for. Once
/// `max_attempts` is exhausted the task is treated as fatal: logged and
/// dropped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let millis = self.base_delay.as_millis().saturating_mul(1u128 << exponent);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_saturates() {
        let policy = RetryPolicy::default();
        let first = policy.delay_for(0);
        let second = policy.delay_for(1);
        assert!(second > first);
        assert_eq!(policy.delay_for(30), policy.max_delay);
    }

    #[test]
    fn exhausted_at_configured_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
