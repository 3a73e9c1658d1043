//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::ticket::{RejectReason, ValidationOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
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

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps interval counters to get a
/// consistent snapshot.
pub struct Metrics {
    /// Total scans ever processed (monotonic)
    scans_total: AtomicU64,
    /// Scans since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Accepted scans (monotonic)
    accepted_total: AtomicU64,
    /// Rejections by reason (monotonic)
    rejected_not_found_total: AtomicU64,
    rejected_already_used_total: AtomicU64,
    rejected_invalid_total: AtomicU64,
    /// Store failures that aborted a scan (monotonic)
    store_errors_total: AtomicU64,
    /// Sum of validation latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max validation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Validation latency histogram buckets (cumulative)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Events published on the bus (monotonic)
    events_published_total: AtomicU64,
    /// Events dropped from subscriber backlogs (monotonic)
    events_dropped_total: AtomicU64,
    /// Heartbeat frames emitted (monotonic)
    heartbeats_total: AtomicU64,
    /// Egress channel messages dropped because the channel was full (monotonic)
    egress_dropped_total: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            accepted_total: AtomicU64::new(0),
            rejected_not_found_total: AtomicU64::new(0),
            rejected_already_used_total: AtomicU64::new(0),
            rejected_invalid_total: AtomicU64::new(0),
            store_errors_total: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            events_published_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            heartbeats_total: AtomicU64::new(0),
            egress_dropped_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed scan with its outcome and latency (lock-free)
    #[inline]
    pub fn record_scan(&self, outcome: ValidationOutcome, latency_us: u64) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);

        match outcome {
            ValidationOutcome::Accepted => {
                self.accepted_total.fetch_add(1, Ordering::Relaxed);
            }
            ValidationOutcome::Rejected(RejectReason::NotFound) => {
                self.rejected_not_found_total.fetch_add(1, Ordering::Relaxed);
            }
            ValidationOutcome::Rejected(RejectReason::AlreadyUsed) => {
                self.rejected_already_used_total.fetch_add(1, Ordering::Relaxed);
            }
            ValidationOutcome::Rejected(RejectReason::Invalid) => {
                self.rejected_invalid_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a scan aborted by store unavailability (lock-free)
    #[inline]
    pub fn record_store_error(&self) {
        self.store_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event published on the bus (lock-free)
    #[inline]
    pub fn record_event_published(&self) {
        self.events_published_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event dropped from a subscriber backlog (lock-free)
    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a heartbeat frame emission (lock-free)
    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an egress message dropped because the channel was full
    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total scans processed
    #[inline]
    pub fn scans_total(&self) -> u64 {
        self.scans_total.load(Ordering::Relaxed)
    }

    /// Generate a summary and reset the interval counters
    ///
    /// `subscribers` and `degraded` are gauges owned by the broadcaster,
    /// passed in by the caller holding both handles.
    pub fn report(&self, subscribers: u64, degraded: u64) -> MetricsSummary {
        let mut last_report = self.last_report_time.lock();
        let elapsed = last_report.elapsed();
        *last_report = Instant::now();
        drop(last_report);

        let scans_in_window = self.scans_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = load_buckets(&self.latency_buckets);

        let scans_per_sec = if elapsed.as_secs_f64() > 0.0 {
            scans_in_window as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency_us =
            if scans_in_window > 0 { latency_sum / scans_in_window } else { 0 };

        let rejected_not_found = self.rejected_not_found_total.load(Ordering::Relaxed);
        let rejected_already_used = self.rejected_already_used_total.load(Ordering::Relaxed);
        let rejected_invalid = self.rejected_invalid_total.load(Ordering::Relaxed);

        MetricsSummary {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            scans_per_sec,
            accepted_total: self.accepted_total.load(Ordering::Relaxed),
            rejected_not_found_total: rejected_not_found,
            rejected_already_used_total: rejected_already_used,
            rejected_invalid_total: rejected_invalid,
            rejected_total: rejected_not_found + rejected_already_used + rejected_invalid,
            store_errors_total: self.store_errors_total.load(Ordering::Relaxed),
            avg_latency_us,
            max_latency_us: latency_max,
            lat_buckets: buckets,
            lat_p50_us: percentile_from_buckets(&buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&buckets, 0.99),
            events_published_total: self.events_published_total.load(Ordering::Relaxed),
            events_dropped_total: self.events_dropped_total.load(Ordering::Relaxed),
            heartbeats_total: self.heartbeats_total.load(Ordering::Relaxed),
            egress_dropped_total: self.egress_dropped_total.load(Ordering::Relaxed),
            subscribers,
            degraded,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Consistent snapshot produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub scans_total: u64,
    pub scans_per_sec: f64,
    pub accepted_total: u64,
    pub rejected_total: u64,
    pub rejected_not_found_total: u64,
    pub rejected_already_used_total: u64,
    pub rejected_invalid_total: u64,
    pub store_errors_total: u64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub events_published_total: u64,
    pub events_dropped_total: u64,
    pub heartbeats_total: u64,
    pub egress_dropped_total: u64,
    pub subscribers: u64,
    pub degraded: u64,
}

impl MetricsSummary {
    /// Log the summary as a structured event
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_total,
            scans_per_sec = self.scans_per_sec,
            accepted = %self.accepted_total,
            rejected = %self.rejected_total,
            store_errors = %self.store_errors_total,
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p99_us = %self.lat_p99_us,
            events_published = %self.events_published_total,
            events_dropped = %self.events_dropped_total,
            egress_dropped = %self.egress_dropped_total,
            subscribers = %self.subscribers,
            degraded = %self.degraded,
            "metrics_report"
        );
    }
}
