//! Retry delay schedule.

use std::time::Duration;

use rand::Rng;
use stride_core::LoaderConfig;

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at
/// `max`, plus uniform jitter in `[0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter_ms: u64,
}

impl Backoff {
    pub fn new(initial_ms: u64, max_ms: u64, multiplier: f64, jitter_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
            jitter_ms,
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(
            config.initial_backoff_ms,
            config.max_backoff_ms,
            config.multiplier,
            config.jitter_ms,
        )
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let ms = (self.initial_ms as f64 * self.multiplier.powi(exponent)).min(self.max_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Delay after failed attempt `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + Duration::from_millis(jitter(self.jitter_ms))
    }
}

fn jitter(jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return 0;
    }
    rand::rng().random_range(0..jitter_ms)
}
