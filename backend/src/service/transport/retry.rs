use rand::Rng;
use std::time::Duration;

/// Reconnect/resync backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of each delay randomized away, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `attempt` (0-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay_ms as f64;
        for _ in 0..attempt {
            delay *= self.backoff_multiplier;
            if delay >= self.max_delay_ms as f64 {
                break;
            }
        }
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }

    /// Delay before retry number `attempt`, shortened by up to `jitter`
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let factor = 1.0 - rand::thread_rng().gen_range(0.0..=jitter);
        base.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(500));
        assert_eq!(policy.base_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(5), Duration::from_millis(10_000));
        assert_eq!(policy.base_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_only_shortens() {
        let policy = RetryPolicy::default();
        for attempt in 0..6 {
            let base = policy.base_delay(attempt);
            let jittered = policy.delay(attempt);
            assert!(jittered <= base);
            assert!(jittered >= base.mul_f64(0.8) - Duration::from_millis(1));
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(3), policy.base_delay(3));
    }
}
