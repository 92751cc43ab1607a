use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Histogram bucket upper bounds, in milliseconds
const BUCKET_BOUNDS_MS: [u64; 6] = [10, 50, 250, 1000, 5000, 30000];

/// Fixed-bucket duration histogram; the last bucket is unbounded
#[derive(Debug, Default)]
struct DurationHistogram {
    buckets: [u64; BUCKET_BOUNDS_MS.len() + 1],
    count: u64,
    total_ms: u64,
}

impl DurationHistogram {
    fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[idx] += 1;
        self.count += 1;
        self.total_ms += ms;
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.to_vec(),
            count: self.count,
            mean_ms: if self.count > 0 {
                self.total_ms / self.count
            } else {
                0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<u64>,
    pub count: u64,
    pub mean_ms: u64,
}

/// Counters and timing histograms exposed to the dashboard
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    captures: AtomicU64,
    captures_suppressed: AtomicU64,
    compressions: AtomicU64,
    compression_failures: AtomicU64,
    observations_created: AtomicU64,
    observations_revised: AtomicU64,
    observations_dropped: AtomicU64,
    items_failed: AtomicU64,
    searches: AtomicU64,
    compression_times: Mutex<DurationHistogram>,
    search_times: Mutex<DurationHistogram>,
}

impl RuntimeMetrics {
    pub fn record_capture(&self) {
        self.captures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_suppressed(&self) {
        self.captures_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression(&self, duration: Duration) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut hist) = self.compression_times.lock() {
            hist.record(duration);
        }
    }

    pub fn record_compression_failure(&self) {
        self.compression_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.observations_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revised(&self) {
        self.observations_revised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.observations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search(&self, duration: Duration) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut hist) = self.search_times.lock() {
            hist.record(duration);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captures: self.captures.load(Ordering::Relaxed),
            captures_suppressed: self.captures_suppressed.load(Ordering::Relaxed),
            compressions: self.compressions.load(Ordering::Relaxed),
            compression_failures: self.compression_failures.load(Ordering::Relaxed),
            observations_created: self.observations_created.load(Ordering::Relaxed),
            observations_revised: self.observations_revised.load(Ordering::Relaxed),
            observations_dropped: self.observations_dropped.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            compression_times: self
                .compression_times
                .lock()
                .map(|h| h.snapshot())
                .unwrap_or_else(|_| DurationHistogram::default().snapshot()),
            search_times: self
                .search_times
                .lock()
                .map(|h| h.snapshot())
                .unwrap_or_else(|_| DurationHistogram::default().snapshot()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub captures: u64,
    pub captures_suppressed: u64,
    pub compressions: u64,
    pub compression_failures: u64,
    pub observations_created: u64,
    pub observations_revised: u64,
    pub observations_dropped: u64,
    pub items_failed: u64,
    pub searches: u64,
    pub compression_times: HistogramSnapshot,
    pub search_times: HistogramSnapshot,
}
