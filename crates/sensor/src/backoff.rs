//! Jittered exponential backoff for the sensor networking loops

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with multiplicative growth, a cap, and jitter
///
/// The first interval is `base`; each subsequent interval multiplies by
/// `factor` up to `max_interval`. Jitter of ±`jitter` (a fraction of the
/// current interval) spreads reconnect storms across the fleet.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    factor: f64,
    max_interval: Duration,
    jitter: f64,
    current: Option<Duration>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl ExponentialBackoff {
    /// Create a backoff doubling from `base` up to `max_interval`
    pub fn new(base: Duration, max_interval: Duration) -> Self {
        Self {
            base,
            factor: 2.0,
            max_interval,
            jitter: 0.1,
            current: None,
        }
    }

    /// Reset to the initial state after a success
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Next sleep interval, growing exponentially with jitter applied
    pub fn next_interval(&mut self) -> Duration {
        let current = match self.current {
            None => self.base,
            Some(current) => {
                let grown = current.mul_f64(self.factor);
                grown.min(self.max_interval)
            }
        };
        self.current = Some(current);

        let jitter_delta = current.mul_f64(self.jitter);
        let spread = jitter_delta.as_secs_f64() * 2.0;
        if spread > 0.0 {
            let offset = rand::rng().random_range(0.0..spread);
            // current - jitter .. current + jitter
            (current - jitter_delta) + Duration::from_secs_f64(offset)
        } else {
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_and_caps() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
        );

        let mut last = Duration::ZERO;
        for _ in 0..8 {
            let interval = backoff.next_interval();
            // Jitter is ±10%, so the cap can only be exceeded by that much
            assert!(interval <= Duration::from_secs(8).mul_f64(1.1));
            assert!(interval >= last.mul_f64(0.5));
            last = interval;
        }
        // After enough doublings the interval sits at the cap (±jitter)
        assert!(last >= Duration::from_secs(8).mul_f64(0.9));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
        );
        backoff.next_interval();
        backoff.next_interval();
        backoff.reset();

        let interval = backoff.next_interval();
        assert!(interval >= Duration::from_secs(2).mul_f64(0.9));
        assert!(interval <= Duration::from_secs(2).mul_f64(1.1));
    }
}
