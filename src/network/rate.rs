//! Exponentially-weighted receive-rate monitor
//!
//! Tracks a bytes/sec rate per peer with a standard EMA smoothing
//! constant (`rate = rate * 0.9 + instantaneous * 0.1`), sampled on
//! every `decrement_in_flight`.

use std::time::Instant;

/// Window over which the EMA meaningfully smooths samples. Not used as
/// a hard cutoff; the smoothing constant below (0.9 / 0.1) is what
/// actually governs decay.
const WINDOW_SECS: f64 = 40.0;

#[derive(Debug, Clone, Copy)]
pub struct RecvRateMonitor {
    rate: f64,
    last_sample: Instant,
}

impl RecvRateMonitor {
    /// Seeds the EMA at `min_rate * e`. The very first tick would
    /// otherwise divide a real byte count by a near-zero elapsed time
    /// and read as a false timeout; seeding above the threshold means
    /// it can never immediately cross it.
    pub fn seeded(min_rate: f64) -> Self {
        Self {
            rate: min_rate * std::f64::consts::E,
            last_sample: Instant::now(),
        }
    }

    /// Folds in a new sample of `bytes` received since the last sample.
    pub fn sample(&mut self, bytes: usize) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample).as_secs_f64().max(1e-3);
        let instantaneous = bytes as f64 / elapsed;
        self.rate = self.rate * 0.9 + instantaneous * 0.1;
        self.last_sample = now;
    }

    pub fn current(&self) -> f64 {
        self.rate
    }

    #[cfg(test)]
    pub fn window_hint_secs() -> f64 {
        WINDOW_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rate_is_above_min() {
        let m = RecvRateMonitor::seeded(7680.0);
        assert!(m.current() > 7680.0);
    }

    #[test]
    fn sampling_moves_the_ema_toward_the_new_value() {
        let mut m = RecvRateMonitor::seeded(7680.0);
        let before = m.current();
        std::thread::sleep(std::time::Duration::from_millis(10));
        m.sample(100_000);
        assert_ne!(m.current(), before);
    }

    #[test]
    fn window_hint_is_forty_seconds() {
        assert_eq!(RecvRateMonitor::window_hint_secs(), 40.0);
    }
}
