//! Metrics collection for the cube cache and interaction loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics collector shared by the store and the controller
#[derive(Debug)]
pub struct EngineMetricsCollector {
    /// Epochs started (activations plus filter-context invalidations)
    pub epochs_started_total: AtomicU64,

    /// Per-view cube builds requested
    pub builds_started_total: AtomicU64,

    /// Cubes installed into the current epoch
    pub builds_installed_total: AtomicU64,

    /// Builds whose epoch was superseded before they finished
    pub builds_discarded_total: AtomicU64,

    /// Per-view cube builds that failed after retry
    pub builds_failed_total: AtomicU64,

    /// Build retries after a retriable failure
    pub build_retries_total: AtomicU64,

    /// Total cube build wall time
    pub build_time_total_ms: AtomicU64,

    /// Queries answered from a ready cube
    pub cache_hits_total: AtomicU64,

    /// Queries answered by a direct backend call
    pub baseline_queries_total: AtomicU64,

    /// Cube diffs that went negative and were discarded
    pub stale_discards_total: AtomicU64,

    /// Ticks that ran an update
    pub frames_total: AtomicU64,

    /// Brush changes folded into a later tick
    pub frames_coalesced_total: AtomicU64,

    /// Views whose update failed
    pub view_errors_total: AtomicU64,

    start_time: Instant,
}

impl Default for EngineMetricsCollector {
    fn default() -> Self {
        Self {
            epochs_started_total: AtomicU64::new(0),
            builds_started_total: AtomicU64::new(0),
            builds_installed_total: AtomicU64::new(0),
            builds_discarded_total: AtomicU64::new(0),
            builds_failed_total: AtomicU64::new(0),
            build_retries_total: AtomicU64::new(0),
            build_time_total_ms: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            baseline_queries_total: AtomicU64::new(0),
            stale_discards_total: AtomicU64::new(0),
            frames_total: AtomicU64::new(0),
            frames_coalesced_total: AtomicU64::new(0),
            view_errors_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl EngineMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_epoch(&self, builds: usize) {
        self.epochs_started_total.fetch_add(1, Ordering::Relaxed);
        self.builds_started_total
            .fetch_add(builds as u64, Ordering::Relaxed);
    }

    /// Record the outcome of one epoch's builds
    pub fn record_build(&self, duration: Duration, installed: usize, failed: usize) {
        self.builds_installed_total
            .fetch_add(installed as u64, Ordering::Relaxed);
        self.builds_failed_total
            .fetch_add(failed as u64, Ordering::Relaxed);
        self.build_time_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_discard(&self, builds: usize) {
        self.builds_discarded_total
            .fetch_add(builds as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.build_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_baseline_query(&self) {
        self.baseline_queries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discard(&self) {
        self.stale_discards_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick that folded `changes` brush changes into one update
    pub fn record_frame(&self, changes: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_coalesced_total
            .fetch_add(changes.saturating_sub(1), Ordering::Relaxed);
    }

    pub fn record_view_error(&self) {
        self.view_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        let hits = self.cache_hits_total.load(Ordering::Relaxed);
        let baseline = self.baseline_queries_total.load(Ordering::Relaxed);
        let installed = self.builds_installed_total.load(Ordering::Relaxed);
        let build_time = self.build_time_total_ms.load(Ordering::Relaxed);

        EngineMetricsSnapshot {
            epochs_started_total: self.epochs_started_total.load(Ordering::Relaxed),
            builds_started_total: self.builds_started_total.load(Ordering::Relaxed),
            builds_installed_total: installed,
            builds_discarded_total: self.builds_discarded_total.load(Ordering::Relaxed),
            builds_failed_total: self.builds_failed_total.load(Ordering::Relaxed),
            build_retries_total: self.build_retries_total.load(Ordering::Relaxed),
            build_time_total_ms: build_time,
            cache_hits_total: hits,
            baseline_queries_total: baseline,
            stale_discards_total: self.stale_discards_total.load(Ordering::Relaxed),
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_coalesced_total: self.frames_coalesced_total.load(Ordering::Relaxed),
            view_errors_total: self.view_errors_total.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            cache_hit_rate: if hits + baseline > 0 {
                hits as f64 / (hits + baseline) as f64
            } else {
                0.0
            },
        }
    }
}

/// Snapshot of engine metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct EngineMetricsSnapshot {
    pub epochs_started_total: u64,
    pub builds_started_total: u64,
    pub builds_installed_total: u64,
    pub builds_discarded_total: u64,
    pub builds_failed_total: u64,
    pub build_retries_total: u64,
    pub build_time_total_ms: u64,
    pub cache_hits_total: u64,
    pub baseline_queries_total: u64,
    pub stale_discards_total: u64,
    pub frames_total: u64,
    pub frames_coalesced_total: u64,
    pub view_errors_total: u64,
    pub uptime_seconds: u64,
    pub cache_hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_rate() {
        let metrics = EngineMetricsCollector::new();
        assert_eq!(metrics.snapshot().cache_hit_rate, 0.0);

        for _ in 0..3 {
            metrics.record_cache_hit();
        }
        metrics.record_baseline_query();
        assert_eq!(metrics.snapshot().cache_hit_rate, 0.75);
    }

    #[test]
    fn test_frames_count_coalesced_changes() {
        let metrics = EngineMetricsCollector::new();
        metrics.record_frame(5);
        metrics.record_frame(1);
        metrics.record_frame(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_total, 3);
        assert_eq!(snapshot.frames_coalesced_total, 4);
    }

    #[test]
    fn test_build_accounting() {
        let metrics = EngineMetricsCollector::new();
        metrics.record_epoch(4);
        metrics.record_build(Duration::from_millis(12), 3, 1);
        metrics.record_epoch(4);
        metrics.record_discard(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.epochs_started_total, 2);
        assert_eq!(snapshot.builds_started_total, 8);
        assert_eq!(snapshot.builds_installed_total, 3);
        assert_eq!(snapshot.builds_failed_total, 1);
        assert_eq!(snapshot.builds_discarded_total, 4);
        assert_eq!(snapshot.build_time_total_ms, 12);
    }
}
