//! Exponential reconnect delays with a ceiling and jitter.

use std::time::Duration;

use rand::Rng;

/// Delay schedule between reconnection attempts.
///
/// Attempts are never capped; only an explicit disconnect stops them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl ReconnectPolicy {
    /// Un-jittered delay before reconnect attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() {
            Duration::from_secs_f64(secs).min(self.max_delay)
        } else {
            self.max_delay
        }
    }

    /// Jittered delay for `attempt`, where `sample` lies in `[-1.0, 1.0]`.
    pub fn delay_with(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let spread = base * self.jitter.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base + spread).max(0.0)).min(self.max_delay)
    }

    /// Jittered delay for `attempt` using the thread RNG.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = rand::rng().random_range(-1.0..=1.0);
        self.delay_with(attempt, sample)
    }
}
