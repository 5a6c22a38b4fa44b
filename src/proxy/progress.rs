//! Progress tracking for the test batch

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Counters owned by the tracker, mutated only through `update`
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub tested: u64,
    pub working: u64,
    pub dead: u64,
}

/// Thread-safe tested/working/dead counters with throttled reporting
pub struct ProgressTracker {
    total: u64,
    interval: Duration,
    start: Instant,
    stats: Mutex<CycleStats>,
    last_report: Mutex<Instant>,
}

impl ProgressTracker {
    pub fn new(total: u64, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            interval,
            start: now,
            stats: Mutex::new(CycleStats::default()),
            // Backdated so the first report is never suppressed.
            last_report: Mutex::new(now.checked_sub(interval).unwrap_or(now)),
        }
    }

    /// Record one completed test
    pub fn update(&self, is_working: bool) {
        let mut stats = self.stats.lock().expect("progress lock poisoned");
        stats.tested += 1;
        if is_working {
            stats.working += 1;
        } else {
            stats.dead += 1;
        }
    }

    /// Current counter snapshot
    pub fn snapshot(&self) -> CycleStats {
        *self.stats.lock().expect("progress lock poisoned")
    }

    /// Emit a progress summary, at most once per interval unless forced
    pub fn report(&self, force: bool) {
        let now = Instant::now();
        {
            let mut last = self.last_report.lock().expect("progress lock poisoned");
            if !force && now.duration_since(*last) < self.interval {
                return;
            }
            *last = now;
        }

        let stats = self.snapshot();
        let elapsed = self.start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            stats.tested as f64 / elapsed
        } else {
            0.0
        };
        let percent = if self.total > 0 {
            stats.tested as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
        let eta = match eta_secs(self.total, stats.tested, rate) {
            Some(secs) => format!("{:.0}s", secs),
            None => "n/a".to_string(),
        };

        info!(
            "progress: {}/{} ({:.1}%) | working: {} | dead: {} | speed: {:.1} p/s | ETA: {}",
            stats.tested, self.total, percent, stats.working, stats.dead, rate, eta
        );
    }
}

/// Estimated seconds remaining, or `None` when no estimate is possible
///
/// Never returns a negative or non-finite value.
fn eta_secs(total: u64, tested: u64, rate: f64) -> Option<f64> {
    if total == 0 || tested == 0 || rate <= 0.0 {
        return None;
    }
    let remaining = total.saturating_sub(tested) as f64 / rate;
    remaining.is_finite().then_some(remaining.max(0.0))
}
