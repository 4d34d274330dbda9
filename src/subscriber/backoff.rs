//! Exponential backoff for subscriber reconnection

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 3_000, // browsers retry after 3 seconds
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Constant delay between attempts, no jitter
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Exponential backoff calculator with jitter
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_base_ms: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms as f64;
        Self {
            config,
            next_base_ms: initial,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; the first call returns the initial delay
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let max = self.config.max_delay_ms as f64;
        let base = self.next_base_ms.min(max);
        self.next_base_ms = (base * self.config.multiplier).min(max);

        let delay = if self.config.jitter_factor > 0.0 && base > 0.0 {
            let jitter_range = base * self.config.jitter_factor;
            base + rand::rng().random_range(-jitter_range..jitter_range)
        } else {
            base
        };

        Duration::from_millis(delay.max(1.0) as u64)
    }

    /// Back to the initial delay, after a successful connection
    pub fn reset(&mut self) {
        self.next_base_ms = self.config.initial_delay_ms as f64;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
