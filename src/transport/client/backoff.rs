use std::time::Duration;

/// Growth factor applied per consecutive failure.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Reconnect delay: `min(base * 1.5^(k-1), max)` for the k-th consecutive
/// failure, back to `base` after a successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Delay for the next scheduled reconnect; counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Delay the next failure would be scheduled with.
    pub fn current(&self) -> Duration {
        let exponent = i32::try_from(self.failures).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * BACKOFF_MULTIPLIER.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
