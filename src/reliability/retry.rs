use rand::Rng;
use std::time::Duration;

/// Exponential backoff settings for batch delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total delivery attempts per batch, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on every further failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.5)`, still capped at
    /// `max_delay`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Backoff schedule for failed batch deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// True once `attempts` deliveries have been made and none may follow.
    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.config.max_attempts
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (zero-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as u64;
        let doubled = base.saturating_mul(2_u64.saturating_pow(attempt));
        let delay = Duration::from_millis(doubled).min(self.config.max_delay);

        if !self.config.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        delay.mul_f64(factor).min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        })
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let p = policy();
        let delays: Vec<_> = (0..5).map(|a| p.calculate_delay(a)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(800));
        assert_eq!(delays[4], Duration::from_secs(1));
        assert_eq!(p.calculate_delay(80), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_half_either_way() {
        let p = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        });
        for _ in 0..50 {
            let d = p.calculate_delay(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn jitter_never_exceeds_the_cap() {
        let p = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
            ..RetryConfig::default()
        });
        for attempt in 0..50 {
            assert!(p.calculate_delay(attempt % 4) <= Duration::from_millis(150));
        }
    }

    #[test]
    fn gives_up_at_the_ceiling() {
        let p = policy();
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
    }
}
