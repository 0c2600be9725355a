//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::StreamKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;
const NUM_STREAMS: usize = StreamKind::ALL.len();

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Records ingested, all streams (monotonic)
    records_total: AtomicU64,
    /// Records since last report (reset on report)
    records_since_report: AtomicU64,
    /// Records ingested per stream, indexed by `StreamKind::index` (monotonic)
    records_by_stream: [AtomicU64; NUM_STREAMS],
    /// Records produced by the fallback generator (monotonic)
    synthetic_total: AtomicU64,
    /// Broker messages received before routing (monotonic)
    messages_received: AtomicU64,
    /// Payloads rejected by the normalizer or unroutable (monotonic)
    malformed_total: AtomicU64,
    /// Records dropped because the ingest channel was full (monotonic)
    ingest_dropped: AtomicU64,
    /// Feed visits rejected (sentinel id, zero consumption, duplicate) (monotonic)
    feed_discarded: AtomicU64,
    /// Sensor readings classified as anomalous (monotonic)
    anomalies_total: AtomicU64,
    /// Updates lost by lagging subscribers (monotonic)
    subscriber_dropped: AtomicU64,
    /// Sum of ingest latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max ingest latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Receive-to-published latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Current ingest queue depth (updated by sampler)
    ingest_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            records_total: AtomicU64::new(0),
            records_since_report: AtomicU64::new(0),
            records_by_stream: std::array::from_fn(|_| AtomicU64::new(0)),
            synthetic_total: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            malformed_total: AtomicU64::new(0),
            ingest_dropped: AtomicU64::new(0),
            feed_discarded: AtomicU64::new(0),
            anomalies_total: AtomicU64::new(0),
            subscriber_dropped: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ingest_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a record was ingested with given receive-to-publish latency (lock-free)
    #[inline]
    pub fn record_ingested(&self, stream: StreamKind, latency_us: u64) {
        self.records_total.fetch_add(1, Ordering::Relaxed);
        self.records_since_report.fetch_add(1, Ordering::Relaxed);
        self.records_by_stream[stream.index()].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_synthetic(&self) {
        self.synthetic_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record dropped due to ingest channel full (lock-free)
    #[inline]
    pub fn record_ingest_dropped(&self) {
        self.ingest_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_feed_discarded(&self) {
        self.feed_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_anomaly(&self) {
        self.anomalies_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record updates lost by a lagging subscriber (lock-free)
    #[inline]
    pub fn record_subscriber_dropped(&self, count: u64) {
        self.subscriber_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Set current ingest queue depth (called by sampler)
    #[inline]
    pub fn set_ingest_queue_depth(&self, depth: u64) {
        self.ingest_queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn records_total(&self) -> u64 {
        self.records_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn records_for(&self, stream: StreamKind) -> u64 {
        self.records_by_stream[stream.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn synthetic_total(&self) -> u64 {
        self.synthetic_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn malformed_total(&self) -> u64 {
        self.malformed_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ingest_dropped(&self) -> u64 {
        self.ingest_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn feed_discarded(&self) -> u64 {
        self.feed_discarded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn anomalies_total(&self) -> u64 {
        self.anomalies_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn subscriber_dropped(&self) -> u64 {
        self.subscriber_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ingest_queue_depth(&self) -> u64 {
        self.ingest_queue_depth.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, registered_cattle: usize, subscribers: usize) -> MetricsSummary {
        let window = Window {
            records: self.records_since_report.swap(0, Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.swap(0, Ordering::Relaxed),
            latency_max_us: self.latency_max_us.swap(0, Ordering::Relaxed),
            buckets: swap_buckets(&self.latency_buckets),
        };

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(window, elapsed, registered_cattle, subscribers)
    }

    /// Same summary as `report` over the window so far, leaving it running
    ///
    /// For scrapes, which must not shorten the periodic report window.
    pub fn snapshot(&self, registered_cattle: usize, subscribers: usize) -> MetricsSummary {
        let window = Window {
            records: self.records_since_report.load(Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.load(Ordering::Relaxed),
            latency_max_us: self.latency_max_us.load(Ordering::Relaxed),
            buckets: load_buckets(&self.latency_buckets),
        };
        let elapsed = self.last_report_time.lock().elapsed();

        self.summarize(window, elapsed, registered_cattle, subscribers)
    }

    fn summarize(
        &self,
        window: Window,
        elapsed: Duration,
        registered_cattle: usize,
        subscribers: usize,
    ) -> MetricsSummary {
        let records_per_sec = if elapsed.as_secs_f64() > 0.0 {
            window.records as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if window.records > 0 { window.latency_sum_us / window.records } else { 0 };

        let mut records_by_stream = [0u64; NUM_STREAMS];
        for (i, counter) in self.records_by_stream.iter().enumerate() {
            records_by_stream[i] = counter.load(Ordering::Relaxed);
        }

        let lat_buckets = window.buckets;
        MetricsSummary {
            records_total: self.records_total(),
            records_per_sec,
            records_by_stream,
            synthetic_total: self.synthetic_total(),
            messages_received: self.messages_received(),
            malformed_total: self.malformed_total(),
            ingest_dropped: self.ingest_dropped(),
            feed_discarded: self.feed_discarded(),
            anomalies_total: self.anomalies_total(),
            subscriber_dropped: self.subscriber_dropped(),
            avg_ingest_latency_us: avg_latency,
            max_ingest_latency_us: window.latency_max_us,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            ingest_queue_depth: self.ingest_queue_depth(),
            registered_cattle,
            subscribers,
        }
    }
}

/// Periodic counters taken for one summary
struct Window {
    records: u64,
    latency_sum_us: u64,
    latency_max_us: u64,
    buckets: [u64; NUM_BUCKETS],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub records_total: u64,
    pub records_per_sec: f64,
    /// Indexed by `StreamKind::index`
    pub records_by_stream: [u64; NUM_STREAMS],
    pub synthetic_total: u64,
    pub messages_received: u64,
    pub malformed_total: u64,
    pub ingest_dropped: u64,
    pub feed_discarded: u64,
    pub anomalies_total: u64,
    pub subscriber_dropped: u64,
    pub avg_ingest_latency_us: u64,
    pub max_ingest_latency_us: u64,
    /// Ingest latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub ingest_queue_depth: u64,
    pub registered_cattle: usize,
    pub subscribers: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            records_total = %self.records_total,
            records_per_sec = format!("{:.1}", self.records_per_sec),
            sensor = %self.records_by_stream[StreamKind::Sensor.index()],
            environment = %self.records_by_stream[StreamKind::Environment.index()],
            gate = %self.records_by_stream[StreamKind::Gate.index()],
            feed = %self.records_by_stream[StreamKind::Feed.index()],
            synthetic = %self.synthetic_total,
            malformed = %self.malformed_total,
            dropped = %self.ingest_dropped,
            p99_us = %self.lat_p99_us,
            cattle = %self.registered_cattle,
            subscribers = %self.subscribers,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.records_total(), 0);
        assert_eq!(metrics.synthetic_total(), 0);
    }

    #[test]
    fn test_record_ingested_per_stream() {
        let metrics = Metrics::new();

        metrics.record_ingested(StreamKind::Sensor, 100);
        metrics.record_ingested(StreamKind::Sensor, 200);
        metrics.record_ingested(StreamKind::Gate, 50);

        assert_eq!(metrics.records_total(), 3);
        assert_eq!(metrics.records_for(StreamKind::Sensor), 2);
        assert_eq!(metrics.records_for(StreamKind::Gate), 1);
        assert_eq!(metrics.records_for(StreamKind::Feed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 350);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_ingested(StreamKind::Environment, 100);
        metrics.record_ingested(StreamKind::Environment, 200);
        metrics.record_ingested(StreamKind::Feed, 300);
        metrics.record_malformed();
        metrics.record_subscriber_dropped(7);

        let summary = metrics.report(4, 2);

        assert_eq!(summary.records_total, 3);
        assert_eq!(summary.avg_ingest_latency_us, 200);
        assert_eq!(summary.max_ingest_latency_us, 300);
        assert_eq!(summary.records_by_stream[StreamKind::Environment.index()], 2);
        assert_eq!(summary.malformed_total, 1);
        assert_eq!(summary.subscriber_dropped, 7);
        assert_eq!(summary.registered_cattle, 4);
        assert_eq!(summary.subscribers, 2);

        // Periodic counters should be reset
        assert_eq!(metrics.records_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
        // Monotonic counters survive
        assert_eq!(metrics.records_total(), 3);
    }

    #[test]
    fn test_snapshot_keeps_window() {
        let metrics = Metrics::new();

        metrics.record_ingested(StreamKind::Sensor, 100);
        metrics.record_ingested(StreamKind::Sensor, 300);

        let first = metrics.snapshot(1, 0);
        let second = metrics.snapshot(1, 0);
        assert_eq!(first.avg_ingest_latency_us, 200);
        assert_eq!(second.avg_ingest_latency_us, 200);
        assert_eq!(second.max_ingest_latency_us, 300);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 2);

        // The periodic report still sees everything since the last report
        let summary = metrics.report(1, 0);
        assert_eq!(summary.avg_ingest_latency_us, 200);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(metrics.snapshot(1, 0).lat_buckets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report(0, 0);

        assert_eq!(summary.records_total, 0);
        assert_eq!(summary.avg_ingest_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for t in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                let stream = StreamKind::ALL[t % StreamKind::ALL.len()];
                for i in 0..1000 {
                    m.record_ingested(stream, i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.records_total(), 8_000);
        assert_eq!(metrics.records_for(StreamKind::Sensor), 2_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        for _ in 0..100 {
            metrics.record_ingested(StreamKind::Sensor, 150);
        }

        let summary = metrics.report(0, 0);

        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
