//! Exponential backoff with jitter (§4.B): a standalone stateful delay
//! generator decoupled from the connection manager itself.

use std::time::Duration;

/// Stateful exponential-backoff-with-jitter delay generator.
///
/// Successive [`Backoff::duration`] calls without a [`Backoff::reset`] form
/// a sequence that is non-decreasing modulo jitter and bounded by `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1_000),
            max: Duration::from_millis(5_000),
            factor: 2.0,
            jitter: 0.5,
            attempts: 0,
        }
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            min,
            max,
            factor: 2.0,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    /// Compute the next delay, applying jitter, clamping to `[min, max]`,
    /// and incrementing the internal attempt counter.
    pub fn duration(&mut self) -> Duration {
        let base = self.min.as_secs_f64() * self.factor.powi(self.attempts as i32);
        let base = base.min(self.max.as_secs_f64());

        let delay = if self.jitter > 0.0 {
            let rand_factor = rand::random::<f64>();
            let deviation = base * self.jitter;
            base - deviation + 2.0 * deviation * rand_factor
        } else {
            base
        };

        self.attempts += 1;
        Duration::from_secs_f64(delay.clamp(self.min.as_secs_f64(), self.max.as_secs_f64()))
    }

    /// Reset the attempt counter back to zero.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Number of `duration()` calls since construction or the last `reset()`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_min(&mut self, min: Duration) {
        self.min = min;
    }

    pub fn set_max(&mut self, max: Duration) {
        self.max = max;
    }

    pub fn set_jitter(&mut self, jitter: f64) {
        self.jitter = jitter.clamp(0.0, 1.0);
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}
