//! Jittered exponential backoff used when redialing or re-verifying a node.

use std::time::Duration;

use rand::Rng;

/// Configuration for [`RedialBackoff`].
#[derive(Debug, Clone)]
pub struct RedialBackoffConfig {
    /// Delay before the first retry.
    pub min: Duration,
    /// Maximum delay (caps exponential growth).
    pub max: Duration,
    /// Multiplier applied on each attempt.
    pub factor: f64,
    /// Pick a random delay between `min` and the computed delay.
    pub jitter: bool,
}

impl Default for RedialBackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(15),
            factor: 2.0,
            jitter: true,
        }
    }
}

/// Stateful backoff: every call to [`next_delay`](Self::next_delay) advances
/// the attempt counter. Retries are unbounded.
#[derive(Debug, Clone)]
pub struct RedialBackoff {
    config: RedialBackoffConfig,
    attempt: u32,
}

impl RedialBackoff {
    pub fn new(config: RedialBackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let min_ms = self.config.min.as_millis() as f64;
        let max_ms = self.config.max.as_millis() as f64;
        let base_ms = (min_ms * self.config.factor.powi(self.attempt as i32)).min(max_ms);
        self.attempt = (self.attempt + 1).min(32);

        let total_ms = if self.config.jitter && base_ms > min_ms {
            rand::thread_rng().gen_range(min_ms..=base_ms)
        } else {
            base_ms
        };
        Duration::from_millis(total_ms as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for RedialBackoff {
    fn default() -> Self {
        Self::new(RedialBackoffConfig::default())
    }
}

/// Spread `d` by up to ±10% so that periodic loops across nodes drift apart.
pub fn with_jitter(d: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    d.mul_f64(factor)
}
