use std::time::Duration;

/// Bounded exponential backoff schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetrySchedule {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, ..Self::default() }
    }

    /// Delay to wait after the given failed attempt (1-based), or `None` when
    /// no attempts remain.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = self.backoff_multiplier.max(1).saturating_pow(attempt.saturating_sub(1));
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetrySchedule;

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let schedule = RetrySchedule {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 3,
            max_delay: Duration::from_millis(1_000),
        };
        assert_eq!(schedule.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(schedule.delay_after(2), Some(Duration::from_millis(300)));
        assert_eq!(schedule.delay_after(3), Some(Duration::from_millis(900)));
        assert_eq!(schedule.delay_after(4), Some(Duration::from_millis(1_000)));
        assert_eq!(schedule.delay_after(6), None);
    }

    #[test]
    fn single_attempt_schedule_never_retries() {
        let schedule = RetrySchedule::new(0, Duration::from_millis(10));
        assert_eq!(schedule.max_attempts, 1);
        assert_eq!(schedule.delay_after(1), None);
    }
}
