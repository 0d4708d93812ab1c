//! Sliding-window request rate estimator.
//!
//! Gates the retention reaper: cleanup only runs while the broker is quiet.

use std::collections::VecDeque;
use std::time::Duration;

use courier_observability::metrics::LOAD_REQUESTS_PER_SECOND;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct LoadMonitor {
    window: Duration,
    samples: Mutex<VecDeque<Instant>>,
}

impl LoadMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            // A zero window would make every rate infinite.
            window: window.max(Duration::from_secs(1)),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record_request(&self) {
        let now = Instant::now();
        let mut samples = self.samples.lock();
        samples.push_back(now);
        self.prune(&mut samples, now);
    }

    /// Requests per second over the window.
    ///
    /// A single sample counts as one request per window; no samples is zero.
    pub fn requests_per_second(&self) -> f64 {
        let now = Instant::now();
        let rate = {
            let mut samples = self.samples.lock();
            self.prune(&mut samples, now);

            match samples.len() {
                0 => 0.0,
                1 => 1.0 / self.window.as_secs_f64(),
                n => {
                    let oldest = samples.front().copied().unwrap_or(now);
                    let span = now.duration_since(oldest).max(Duration::from_secs(1));
                    n as f64 / span.as_secs_f64()
                }
            }
        };

        LOAD_REQUESTS_PER_SECOND.set(rate);
        rate
    }

    pub fn is_low_load(&self, threshold: f64) -> bool {
        self.requests_per_second() < threshold
    }

    fn prune(&self, samples: &mut VecDeque<Instant>, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while samples.front().is_some_and(|t| *t < cutoff) {
            samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_empty_monitor_reports_zero() {
        let monitor = LoadMonitor::new(Duration::from_secs(60));
        assert_eq!(monitor.requests_per_second(), 0.0);
        assert!(monitor.is_low_load(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_sample_is_one_per_window() {
        let monitor = LoadMonitor::new(Duration::from_secs(60));
        monitor.record_request();
        assert!((monitor.requests_per_second() - 1.0 / 60.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_high_load_until_window_passes() {
        let window = Duration::from_secs(60);
        let threshold = 10.0;
        let monitor = LoadMonitor::new(window);

        // More than threshold * window requests inside one second.
        for _ in 0..601 {
            monitor.record_request();
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!monitor.is_low_load(threshold));

        tokio::time::advance(window + Duration::from_secs(1)).await;
        assert!(monitor.is_low_load(threshold));
        assert_eq!(monitor.requests_per_second(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_uses_oldest_sample_span() {
        let monitor = LoadMonitor::new(Duration::from_secs(60));
        for _ in 0..10 {
            monitor.record_request();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // Ten samples spread over ten seconds.
        assert!((monitor.requests_per_second() - 1.0).abs() < 1e-9);
    }
}
