//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the display loop never waits on the reporter or the
//! Prometheus endpoint. Only `report()` resets the periodic counters.
//!
//! NOTE: All atomics use Relaxed ordering - these are statistical counters
//! only and must not drive any reveal logic.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Refresh latency bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];
const NUM_BUCKETS: usize = 11;

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Notifications delivered by the change feed (monotonic)
    notifications_total: AtomicU64,
    /// Notifications since last report (reset on report)
    notifications_since_report: AtomicU64,
    /// Notifications for a group that is no longer active (monotonic)
    notifications_ignored: AtomicU64,
    /// Feed payloads that could not be decoded (monotonic)
    feed_malformed: AtomicU64,
    /// Reveal sessions started (monotonic)
    sessions_started: AtomicU64,
    /// Sessions replaced by a newer notification during suspense (monotonic)
    sessions_superseded: AtomicU64,
    /// Reveals that reached the settled state (monotonic)
    reveals_completed: AtomicU64,
    /// Successful refreshes (monotonic)
    refresh_total: AtomicU64,
    /// Failed refreshes (monotonic)
    refresh_failed: AtomicU64,
    /// Refresh latency histogram in ms (reset on report)
    refresh_latency_buckets: [AtomicU64; NUM_BUCKETS],
    refresh_latency_sum_ms: AtomicU64,
    refresh_latency_max_ms: AtomicU64,
    /// Cumulative latency histogram for the exporter (monotonic)
    refresh_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    refresh_latency_sum_total_ms: AtomicU64,
    /// Names replaced by the anonymous label (monotonic)
    name_fallbacks: AtomicU64,
    /// Change feed subscriptions that could not be opened (monotonic)
    subscribe_failures: AtomicU64,
    /// Active group changes (monotonic)
    group_switches: AtomicU64,
    /// Display frames dropped because the publisher was behind (monotonic)
    frames_dropped: AtomicU64,
    /// Currently displayed vote count
    displayed_count: AtomicU64,
    /// Currently displayed average, in tenths
    displayed_average_tenths: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            notifications_total: AtomicU64::new(0),
            notifications_since_report: AtomicU64::new(0),
            notifications_ignored: AtomicU64::new(0),
            feed_malformed: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_superseded: AtomicU64::new(0),
            reveals_completed: AtomicU64::new(0),
            refresh_total: AtomicU64::new(0),
            refresh_failed: AtomicU64::new(0),
            refresh_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            refresh_latency_sum_ms: AtomicU64::new(0),
            refresh_latency_max_ms: AtomicU64::new(0),
            refresh_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            refresh_latency_sum_total_ms: AtomicU64::new(0),
            name_fallbacks: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
            group_switches: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            displayed_count: AtomicU64::new(0),
            displayed_average_tenths: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_notification(&self) {
        self.notifications_total.fetch_add(1, Ordering::Relaxed);
        self.notifications_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_ignored(&self) {
        self.notifications_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_feed_malformed(&self) {
        self.feed_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_superseded(&self) {
        self.sessions_superseded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reveal_completed(&self) {
        self.reveals_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refresh outcome with its fetch latency
    pub fn record_refresh(&self, latency_ms: u64, ok: bool) {
        if ok {
            self.refresh_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refresh_failed.fetch_add(1, Ordering::Relaxed);
        }
        let bucket = bucket_index(latency_ms);
        self.refresh_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.refresh_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.refresh_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
        self.refresh_latency_sum_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.refresh_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_name_fallback(&self) {
        self.name_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_subscribe_failure(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_group_switch(&self) {
        self.group_switches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_displayed(&self, count: u64, average_tenths: u32) {
        self.displayed_count.store(count, Ordering::Relaxed);
        self.displayed_average_tenths.store(u64::from(average_tenths), Ordering::Relaxed);
    }

    pub fn notifications_total(&self) -> u64 {
        self.notifications_total.load(Ordering::Relaxed)
    }

    pub fn sessions_superseded(&self) -> u64 {
        self.sessions_superseded.load(Ordering::Relaxed)
    }

    pub fn reveals_completed(&self) -> u64 {
        self.reveals_completed.load(Ordering::Relaxed)
    }

    pub fn refresh_failed(&self) -> u64 {
        self.refresh_failed.load(Ordering::Relaxed)
    }

    pub fn name_fallbacks(&self) -> u64 {
        self.name_fallbacks.load(Ordering::Relaxed)
    }

    pub fn subscribe_failures(&self) -> u64 {
        self.subscribe_failures.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let notifications_count = self.notifications_since_report.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.refresh_latency_buckets);
        let latency_sum = self.refresh_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.refresh_latency_max_ms.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let notifications_per_min = if elapsed.as_secs_f64() > 0.0 {
            notifications_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        self.summarize(buckets, latency_sum, latency_max, notifications_per_min)
    }

    /// Current values without resetting anything (Prometheus scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        let mut buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.refresh_latency_buckets.iter().enumerate() {
            buckets[i] = bucket.load(Ordering::Relaxed);
        }
        let elapsed = self.last_report_time.lock().elapsed().as_secs_f64();
        let since_report = self.notifications_since_report.load(Ordering::Relaxed);
        let notifications_per_min = if elapsed > 0.0 { since_report as f64 * 60.0 / elapsed } else { 0.0 };

        self.summarize(
            buckets,
            self.refresh_latency_sum_ms.load(Ordering::Relaxed),
            self.refresh_latency_max_ms.load(Ordering::Relaxed),
            notifications_per_min,
        )
    }

    fn summarize(
        &self,
        refresh_latency_buckets: [u64; NUM_BUCKETS],
        latency_sum: u64,
        latency_max: u64,
        notifications_per_min: f64,
    ) -> MetricsSummary {
        let latency_count: u64 = refresh_latency_buckets.iter().sum();
        let mut refresh_latency_buckets_total = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.refresh_latency_buckets_total.iter().enumerate() {
            refresh_latency_buckets_total[i] = bucket.load(Ordering::Relaxed);
        }
        MetricsSummary {
            notifications_total: self.notifications_total.load(Ordering::Relaxed),
            notifications_per_min,
            notifications_ignored: self.notifications_ignored.load(Ordering::Relaxed),
            feed_malformed: self.feed_malformed.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_superseded: self.sessions_superseded.load(Ordering::Relaxed),
            reveals_completed: self.reveals_completed.load(Ordering::Relaxed),
            refresh_total: self.refresh_total.load(Ordering::Relaxed),
            refresh_failed: self.refresh_failed.load(Ordering::Relaxed),
            refresh_latency_buckets,
            refresh_latency_avg_ms: if latency_count > 0 { latency_sum / latency_count } else { 0 },
            refresh_latency_max_ms: latency_max,
            refresh_latency_p95_ms: percentile_from_buckets(&refresh_latency_buckets, 0.95),
            refresh_latency_buckets_total,
            refresh_latency_sum_total_ms: self.refresh_latency_sum_total_ms.load(Ordering::Relaxed),
            name_fallbacks: self.name_fallbacks.load(Ordering::Relaxed),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
            group_switches: self.group_switches.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            displayed_count: self.displayed_count.load(Ordering::Relaxed),
            displayed_average_tenths: self.displayed_average_tenths.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub notifications_total: u64,
    pub notifications_per_min: f64,
    pub notifications_ignored: u64,
    pub feed_malformed: u64,
    pub sessions_started: u64,
    pub sessions_superseded: u64,
    pub reveals_completed: u64,
    pub refresh_total: u64,
    pub refresh_failed: u64,
    pub refresh_latency_buckets: [u64; NUM_BUCKETS],
    pub refresh_latency_avg_ms: u64,
    pub refresh_latency_max_ms: u64,
    pub refresh_latency_p95_ms: u64,
    /// Since startup, never reset
    pub refresh_latency_buckets_total: [u64; NUM_BUCKETS],
    pub refresh_latency_sum_total_ms: u64,
    pub name_fallbacks: u64,
    pub subscribe_failures: u64,
    pub group_switches: u64,
    pub frames_dropped: u64,
    pub displayed_count: u64,
    pub displayed_average_tenths: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            notifications_total = %self.notifications_total,
            notifications_per_min = format!("{:.1}", self.notifications_per_min),
            sessions_started = %self.sessions_started,
            sessions_superseded = %self.sessions_superseded,
            reveals_completed = %self.reveals_completed,
            refresh_failed = %self.refresh_failed,
            refresh_avg_ms = %self.refresh_latency_avg_ms,
            refresh_p95_ms = %self.refresh_latency_p95_ms,
            displayed_count = %self.displayed_count,
            displayed_average = format!("{}.{}", self.displayed_average_tenths / 10, self.displayed_average_tenths % 10),
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(5), 0);
        assert_eq!(bucket_index(6), 1);
        assert_eq!(bucket_index(5000), 9);
        assert_eq!(bucket_index(60_000), 10);
    }

    #[test]
    fn test_record_refresh() {
        let metrics = Metrics::new();
        metrics.record_refresh(20, true);
        metrics.record_refresh(40, false);

        assert_eq!(metrics.refresh_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.refresh_failed(), 1);
        assert_eq!(metrics.refresh_latency_sum_ms.load(Ordering::Relaxed), 60);
        assert_eq!(metrics.refresh_latency_max_ms.load(Ordering::Relaxed), 40);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_notification();
        metrics.record_notification();
        metrics.record_refresh(10, true);
        metrics.record_refresh(30, true);
        metrics.set_displayed(2, 60);

        let summary = metrics.report();
        assert_eq!(summary.notifications_total, 2);
        assert_eq!(summary.refresh_total, 2);
        assert_eq!(summary.refresh_latency_avg_ms, 20);
        assert_eq!(summary.refresh_latency_max_ms, 30);
        assert_eq!(summary.displayed_count, 2);
        assert_eq!(summary.displayed_average_tenths, 60);

        // Periodic counters reset, monotonic ones do not
        assert_eq!(metrics.notifications_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.refresh_latency_sum_ms.load(Ordering::Relaxed), 0);
        let second = metrics.report();
        assert_eq!(second.notifications_total, 2);
        assert_eq!(second.refresh_latency_avg_ms, 0);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_refresh(40, true);
        assert_eq!(metrics.snapshot().refresh_latency_max_ms, 40);
        assert_eq!(metrics.snapshot().refresh_latency_max_ms, 40);
        assert_eq!(metrics.report().refresh_latency_max_ms, 40);
        assert_eq!(metrics.snapshot().refresh_latency_max_ms, 0);
    }

    #[test]
    fn test_report_keeps_cumulative_histogram() {
        let metrics = Metrics::new();
        metrics.record_refresh(7, true);
        metrics.record_refresh(30, true);
        metrics.report();
        metrics.record_refresh(31, false);

        let summary = metrics.report();
        assert_eq!(summary.refresh_latency_buckets.iter().sum::<u64>(), 1);
        assert_eq!(summary.refresh_latency_buckets_total.iter().sum::<u64>(), 3);
        assert_eq!(summary.refresh_latency_sum_total_ms, 68);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.95), 0);
        buckets[2] = 19;
        buckets[6] = 1;
        assert_eq!(percentile_from_buckets(&buckets, 0.95), 25);
        assert_eq!(percentile_from_buckets(&buckets, 1.0), 500);
    }
}
