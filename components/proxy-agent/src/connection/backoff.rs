// External crates
use std::time::Duration;

/// Exponential reconnect backoff: `delay_n = min(initial * multiplier^n, max)`
/// where `n` is the 0-based attempt counter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
