//! Broker reconnection configuration.

use std::time::Duration;

use serde::Deserialize;

/// Backoff for the background broker connect loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectionConfig {
    /// Initial delay before the second connection attempt (milliseconds).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30000 // 30 seconds
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectionConfig {
    /// Delay before attempt `failures + 1`, capped at `max_delay_ms`.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64) as u64
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let config = ReconnectionConfig::default();
        assert_eq!(config.delay_after(0), Duration::from_millis(500));
        assert_eq!(config.delay_after(1), Duration::from_millis(1000));
        assert_eq!(config.delay_after(10), Duration::from_millis(30000));
        assert_eq!(config.delay_after(u32::MAX), Duration::from_millis(30000));
    }
}
