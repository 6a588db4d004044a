use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff with a cap and proportional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Jitter upper bound as a fraction of the computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter,
        }
    }

    /// A policy that performs exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt `attempt` (1-based), without jitter:
    /// `min(base * multiplier^(attempt-1), max_delay)`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let ms = (base_ms * self.multiplier.max(1.0).powi(exp)).min(max_ms);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Delay with jitter applied. `unit` is a uniform sample in `[0, 1)`.
    /// The result never exceeds `max_delay`.
    pub fn delay_for(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay_for(attempt);
        let spread = self.jitter.clamp(0.0, 1.0) * unit.clamp(0.0, 1.0);
        let jitter = Duration::from_millis((base.as_millis() as f64 * spread) as u64);
        (base + jitter).min(self.max_delay)
    }

    /// Delay for `attempt` using a fresh random jitter sample.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_for(attempt, rand::random::<f64>())
    }
}
