//! Pipeline metrics with atomic counters, gauges, and a write-duration
//! histogram.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for sink write duration.
/// Converts to seconds: [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
const WRITE_DURATION_BUCKETS_MS: [u64; 7] = [10, 50, 100, 250, 500, 1000, 2500];

/// Process-wide pipeline metrics.
///
/// The invalid-message counter lives here and is handed to the decoder at
/// construction; there is no module-level singleton. All counters are plain
/// atomics, safe for concurrent increment from any worker.
pub struct PipelineMetrics {
    // === COUNTERS ===
    /// Total messages consumed from the queue
    messages_total: AtomicU64,

    /// Total payloads rejected by the decoder
    invalid_messages_total: AtomicU64,

    /// Total events that decoded successfully
    events_decoded_total: AtomicU64,

    /// Events routed, per lane
    routed_order_total: AtomicU64,
    routed_inventory_total: AtomicU64,
    routed_user_activity_total: AtomicU64,

    /// Object sink writes
    object_writes_total: AtomicU64,
    object_write_errors_total: AtomicU64,

    /// Warehouse sink appends (calls) and rows
    warehouse_appends_total: AtomicU64,
    warehouse_rows_total: AtomicU64,
    warehouse_write_errors_total: AtomicU64,

    /// Rows rejected by schema validation
    schema_violations_total: AtomicU64,

    /// Offset batches committed back to the queue
    offset_commits_total: AtomicU64,

    // === GAUGES ===
    /// Messages currently being processed
    in_flight: AtomicU64,

    // === HISTOGRAM: write_duration_seconds ===
    write_duration_sum_ms: AtomicU64,
    write_duration_count: AtomicU64,
    /// Bucket counts; last slot is +Inf
    write_duration_buckets: [AtomicU64; 8],
}

impl PipelineMetrics {
    /// Create new metrics, all zeroed.
    pub fn new() -> Self {
        Self {
            messages_total: AtomicU64::new(0),
            invalid_messages_total: AtomicU64::new(0),
            events_decoded_total: AtomicU64::new(0),
            routed_order_total: AtomicU64::new(0),
            routed_inventory_total: AtomicU64::new(0),
            routed_user_activity_total: AtomicU64::new(0),
            object_writes_total: AtomicU64::new(0),
            object_write_errors_total: AtomicU64::new(0),
            warehouse_appends_total: AtomicU64::new(0),
            warehouse_rows_total: AtomicU64::new(0),
            warehouse_write_errors_total: AtomicU64::new(0),
            schema_violations_total: AtomicU64::new(0),
            offset_commits_total: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            write_duration_sum_ms: AtomicU64::new(0),
            write_duration_count: AtomicU64::new(0),
            write_duration_buckets: Default::default(),
        }
    }

    /// Record a message pulled from the queue.
    pub fn record_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload the decoder rejected.
    pub fn record_invalid_message(&self) {
        self.invalid_messages_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful decode.
    pub fn record_decoded(&self) {
        self.events_decoded_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a routed event for the given lane counter.
    pub fn record_routed(&self, lane: crate::route::Lane) {
        use crate::route::Lane;
        match lane {
            Lane::Order => self.routed_order_total.fetch_add(1, Ordering::Relaxed),
            Lane::Inventory => self.routed_inventory_total.fetch_add(1, Ordering::Relaxed),
            Lane::UserActivity => self
                .routed_user_activity_total
                .fetch_add(1, Ordering::Relaxed),
            // Unrouted events are dropped without a counter.
            Lane::Unrouted => return,
        };
    }

    /// Record a successful object write with its duration.
    pub fn record_object_write(&self, duration: Duration) {
        self.object_writes_total.fetch_add(1, Ordering::Relaxed);
        self.observe_write_duration(duration);
    }

    /// Record a failed object write.
    pub fn record_object_write_error(&self) {
        self.object_write_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful warehouse append of `rows` rows.
    pub fn record_warehouse_append(&self, rows: usize, duration: Duration) {
        self.warehouse_appends_total.fetch_add(1, Ordering::Relaxed);
        self.warehouse_rows_total
            .fetch_add(rows as u64, Ordering::Relaxed);
        self.observe_write_duration(duration);
    }

    /// Record a failed warehouse append.
    pub fn record_warehouse_write_error(&self) {
        self.warehouse_write_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row rejected by schema validation.
    pub fn record_schema_violation(&self) {
        self.schema_violations_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an offset commit back to the queue.
    pub fn record_offset_commit(&self) {
        self.offset_commits_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the in-flight gauge.
    pub fn worker_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the in-flight gauge.
    pub fn worker_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn observe_write_duration(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.write_duration_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.write_duration_count.fetch_add(1, Ordering::Relaxed);

        for (i, boundary) in WRITE_DURATION_BUCKETS_MS.iter().enumerate() {
            if ms <= *boundary {
                self.write_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.write_duration_buckets[WRITE_DURATION_BUCKETS_MS.len()]
            .fetch_add(1, Ordering::Relaxed);
    }

    // === ACCESSORS ===

    pub fn messages_total(&self) -> u64 {
        self.messages_total.load(Ordering::Relaxed)
    }

    pub fn invalid_messages_total(&self) -> u64 {
        self.invalid_messages_total.load(Ordering::Relaxed)
    }

    pub fn events_decoded_total(&self) -> u64 {
        self.events_decoded_total.load(Ordering::Relaxed)
    }

    pub fn routed_order_total(&self) -> u64 {
        self.routed_order_total.load(Ordering::Relaxed)
    }

    pub fn routed_inventory_total(&self) -> u64 {
        self.routed_inventory_total.load(Ordering::Relaxed)
    }

    pub fn routed_user_activity_total(&self) -> u64 {
        self.routed_user_activity_total.load(Ordering::Relaxed)
    }

    pub fn object_writes_total(&self) -> u64 {
        self.object_writes_total.load(Ordering::Relaxed)
    }

    pub fn object_write_errors_total(&self) -> u64 {
        self.object_write_errors_total.load(Ordering::Relaxed)
    }

    pub fn warehouse_appends_total(&self) -> u64 {
        self.warehouse_appends_total.load(Ordering::Relaxed)
    }

    pub fn warehouse_rows_total(&self) -> u64 {
        self.warehouse_rows_total.load(Ordering::Relaxed)
    }

    pub fn warehouse_write_errors_total(&self) -> u64 {
        self.warehouse_write_errors_total.load(Ordering::Relaxed)
    }

    pub fn schema_violations_total(&self) -> u64 {
        self.schema_violations_total.load(Ordering::Relaxed)
    }

    pub fn offset_commits_total(&self) -> u64 {
        self.offset_commits_total.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Snapshot of the write-duration histogram for export.
    pub fn write_duration_histogram(&self) -> WriteDurationHistogram {
        let mut cumulative = 0;
        let mut buckets = Vec::with_capacity(WRITE_DURATION_BUCKETS_MS.len());
        for (i, boundary) in WRITE_DURATION_BUCKETS_MS.iter().enumerate() {
            cumulative += self.write_duration_buckets[i].load(Ordering::Relaxed);
            buckets.push((*boundary as f64 / 1000.0, cumulative));
        }
        let inf_bucket =
            cumulative + self.write_duration_buckets[WRITE_DURATION_BUCKETS_MS.len()]
                .load(Ordering::Relaxed);

        WriteDurationHistogram {
            buckets,
            inf_bucket,
            sum_seconds: self.write_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.write_duration_count.load(Ordering::Relaxed),
        }
    }

    /// Snapshot all counters at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_total: self.messages_total(),
            invalid_messages_total: self.invalid_messages_total(),
            events_decoded_total: self.events_decoded_total(),
            routed_order_total: self.routed_order_total(),
            routed_inventory_total: self.routed_inventory_total(),
            routed_user_activity_total: self.routed_user_activity_total(),
            object_writes_total: self.object_writes_total(),
            object_write_errors_total: self.object_write_errors_total(),
            warehouse_appends_total: self.warehouse_appends_total(),
            warehouse_rows_total: self.warehouse_rows_total(),
            warehouse_write_errors_total: self.warehouse_write_errors_total(),
            schema_violations_total: self.schema_violations_total(),
            offset_commits_total: self.offset_commits_total(),
            in_flight: self.in_flight(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_total: u64,
    pub invalid_messages_total: u64,
    pub events_decoded_total: u64,
    pub routed_order_total: u64,
    pub routed_inventory_total: u64,
    pub routed_user_activity_total: u64,
    pub object_writes_total: u64,
    pub object_write_errors_total: u64,
    pub warehouse_appends_total: u64,
    pub warehouse_rows_total: u64,
    pub warehouse_write_errors_total: u64,
    pub schema_violations_total: u64,
    pub offset_commits_total: u64,
    pub in_flight: u64,
}

/// Exported histogram state (cumulative buckets, Prometheus convention).
#[derive(Debug, Clone)]
pub struct WriteDurationHistogram {
    /// (upper boundary in seconds, cumulative count) pairs
    pub buckets: Vec<(f64, u64)>,
    /// Count for the +Inf bucket
    pub inf_bucket: u64,
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Number of observations
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = PipelineMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_total, 0);
        assert_eq!(snapshot.invalid_messages_total, 0);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn test_record_and_snapshot() {
        let metrics = PipelineMetrics::new();
        metrics.record_message();
        metrics.record_message();
        metrics.record_decoded();
        metrics.record_routed(crate::route::Lane::Order);
        metrics.record_routed(crate::route::Lane::Unrouted);
        metrics.record_object_write(Duration::from_millis(5));
        metrics.record_warehouse_append(1, Duration::from_millis(120));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_total, 2);
        assert_eq!(snapshot.events_decoded_total, 1);
        assert_eq!(snapshot.routed_order_total, 1);
        assert_eq!(snapshot.object_writes_total, 1);
        assert_eq!(snapshot.warehouse_appends_total, 1);
        assert_eq!(snapshot.warehouse_rows_total, 1);
    }

    #[test]
    fn test_in_flight_gauge() {
        let metrics = PipelineMetrics::new();
        metrics.worker_started();
        metrics.worker_started();
        assert_eq!(metrics.in_flight(), 2);
        metrics.worker_finished();
        assert_eq!(metrics.in_flight(), 1);
    }

    #[test]
    fn test_histogram_buckets_cumulative() {
        let metrics = PipelineMetrics::new();
        metrics.record_object_write(Duration::from_millis(5)); // <= 10ms bucket
        metrics.record_object_write(Duration::from_millis(200)); // <= 250ms bucket
        metrics.record_object_write(Duration::from_secs(10)); // +Inf

        let histogram = metrics.write_duration_histogram();
        assert_eq!(histogram.count, 3);
        // First bucket (0.01s) holds one observation
        assert_eq!(histogram.buckets[0], (0.01, 1));
        // 0.25s bucket is cumulative: both fast observations
        let quarter = histogram
            .buckets
            .iter()
            .find(|(le, _)| (*le - 0.25).abs() < f64::EPSILON)
            .unwrap();
        assert_eq!(quarter.1, 2);
        assert_eq!(histogram.inf_bucket, 3);
    }

    #[test]
    fn test_concurrent_invalid_message_increments() {
        let metrics = Arc::new(PipelineMetrics::new());
        let workers = 64;

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || metrics.record_invalid_message())
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.invalid_messages_total(), workers);
    }
}
