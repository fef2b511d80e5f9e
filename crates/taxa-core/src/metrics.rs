//! Progress metrics for long-running sync phases.
//!
//! A [`MetricsTracker`] counts processed items and API calls against a known
//! total and derives rate, percent done and time remaining from the elapsed
//! wall-clock time.

use std::time::{Duration, Instant};

/// Counts progress through one phase of a sync.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taxa_core::metrics::MetricsTracker;
///
/// let mut tracker = MetricsTracker::new(100);
/// tracker.record_processed(10);
///
/// assert_eq!(tracker.rate_over(Duration::from_secs(1)), 10.0);
/// assert_eq!(tracker.remaining_over(Duration::from_secs(1)), Duration::from_secs(9));
/// assert_eq!(tracker.percent(), 10.0);
/// ```
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    total: usize,
    processed: usize,
    api_calls: usize,
    started: Instant,
}

impl MetricsTracker {
    /// Starts tracking a phase of `total` items.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            api_calls: 0,
            started: Instant::now(),
        }
    }

    pub fn record_processed(&mut self, count: usize) {
        self.processed += count;
    }

    pub fn record_api_calls(&mut self, count: usize) {
        self.api_calls += count;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Items per second over `elapsed`; zero when no time has passed.
    pub fn rate_over(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.processed as f64 / secs
    }

    /// Estimated time left at the rate observed over `elapsed`.
    ///
    /// Zero when nothing has been processed yet or the phase is complete.
    pub fn remaining_over(&self, elapsed: Duration) -> Duration {
        let rate = self.rate_over(elapsed);
        let left = self.total.saturating_sub(self.processed);
        if rate == 0.0 || left == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(left as f64 / rate)
    }

    /// Share of the total processed, 0-100. Zero for an empty phase.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }

    /// One-line progress report as of now.
    pub fn report(&self) -> String {
        self.report_over(self.elapsed())
    }

    /// One-line progress report as of `elapsed` since the start.
    pub fn report_over(&self, elapsed: Duration) -> String {
        format!(
            "Progress: {}/{} items ({:.1}%) | Rate: {:.2} items/sec | API calls: {} | Elapsed: {:.1}s | Est. remaining: {:.1}s",
            self.processed,
            self.total,
            self.percent(),
            self.rate_over(elapsed),
            self.api_calls,
            elapsed.as_secs_f64(),
            self.remaining_over(elapsed).as_secs_f64()
        )
    }
}
