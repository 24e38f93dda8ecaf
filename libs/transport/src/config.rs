//! Transport configuration and the connect retry policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Construction-time transport configuration; not re-validated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Largest message accepted for a single send.
    pub max_message_size: usize,
    /// Conductor idle sleep between duty cycles with no work.
    pub poll_interval: Duration,
    /// Bytes read from a channel's media per pump pass.
    pub read_chunk_size: usize,
    /// Connect retry/backoff parameters.
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024,
            poll_interval: Duration::from_millis(1),
            read_chunk_size: 64 * 1024,
            retry: RetryConfig::default(),
        }
    }
}

/// Capped exponential backoff for outbound connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the delay randomized to spread reconnect storms.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt, given how many attempts failed so far.
    pub fn delay_for(&self, failed_attempts: usize) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16) as u32;
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff);

        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.mul_f64(self.jitter);
        let jittered = rand::thread_rng().gen_range(0.0..=1.0);
        base + spread.mul_f64(jittered)
    }
}
