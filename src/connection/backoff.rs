use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential reconnect delays: `min(initial * multiplier^attempt, max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
  config: BackoffConfig,
  attempt: u32,
}

impl Backoff {
  pub fn new(config: BackoffConfig) -> Self {
    Self { config, attempt: 0 }
  }

  /// Delay before the next attempt. Advances the curve.
  pub fn next_delay(&mut self) -> Duration {
    let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
    let scaled = self.config.initial_ms as f64 * self.config.multiplier.powi(exponent);
    let capped = scaled.min(self.config.max_ms as f64);
    self.attempt = self.attempt.saturating_add(1);
    Duration::from_millis(capped as u64)
  }

  pub fn reset(&mut self) {
    self.attempt = 0;
  }

  /// Attempts scheduled since the last reset.
  pub fn attempts(&self) -> u32 {
    self.attempt
  }
}
