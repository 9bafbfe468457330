//! Retry policy for reasoning attempts.

use std::time::Duration;

use codeact_config::ReasonerConfig;
use codeact_core::ProviderError;

/// Bounded attempts with exponential backoff and jitter between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }

    pub fn from_config(config: &ReasonerConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay())
    }

    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO).with_jitter(0.0)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base =
            self.base_delay.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let clamped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let range = clamped * self.jitter;
            let offset = rand::random::<f64>() * range * 2.0 - range;
            (clamped + offset).max(0.0)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }

    /// Delay after a provider error, honouring a rate limit's `retry_after`.
    pub fn delay_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = self.delay_for(attempt);
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs).min(self.max_delay))
            }
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReasonerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100)).with_jitter(0.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn capped_at_max_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100))
            .with_jitter(0.0)
            .with_max_delay(Duration::from_millis(250));
        assert_eq!(policy.delay_for(10), Duration::from_millis(250));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000)).with_jitter(0.1);
        for _ in 0..50 {
            let d = policy.delay_for(1).as_millis();
            assert!((900..=1100).contains(&d), "{d}");
        }
    }

    #[test]
    fn rate_limit_waits_at_least_retry_after() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).with_jitter(0.0);
        let delay = policy.delay_after(1, &ProviderError::RateLimited { retry_after_secs: 2 });
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), 3);
    }
}
