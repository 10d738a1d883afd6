use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Aggregate counters for the tiered cache layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub oversize_rejections: u64,
    pub total_operations: u64,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub avg_read_time_ms: f64,
    pub avg_write_time_ms: f64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub circuit_breaker_trips: u64,
    pub compression_ratio: f64,
}

#[derive(Default)]
pub(crate) struct MetricsRecorder {
    hits: u64,
    misses: u64,
    errors: u64,
    timeouts: u64,
    oversize: u64,
    reads: u64,
    writes: u64,
    total_bytes_read: u64,
    total_bytes_written: u64,
    total_read_time_ms: f64,
    total_write_time_ms: f64,
    raw_bytes: u64,
    stored_bytes: u64,
}

pub(crate) struct SharedMetrics {
    inner: Mutex<MetricsRecorder>,
}

impl SharedMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsRecorder::default()),
        }
    }

    pub fn record_hit(&self, bytes: u64, elapsed_ms: f64) {
        let mut m = self.inner.lock();
        m.hits += 1;
        m.reads += 1;
        m.total_bytes_read += bytes;
        m.total_read_time_ms += elapsed_ms;
    }

    pub fn record_miss(&self, elapsed_ms: f64) {
        let mut m = self.inner.lock();
        m.misses += 1;
        m.reads += 1;
        m.total_read_time_ms += elapsed_ms;
    }

    pub fn record_write(&self, raw: u64, stored: u64, elapsed_ms: f64) {
        let mut m = self.inner.lock();
        m.writes += 1;
        m.total_bytes_written += stored;
        m.total_write_time_ms += elapsed_ms;
        m.raw_bytes += raw;
        m.stored_bytes += stored;
    }

    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    pub fn record_timeout(&self) {
        self.inner.lock().timeouts += 1;
    }

    pub fn record_oversize(&self) {
        self.inner.lock().oversize += 1;
    }

    pub fn snapshot(&self, breaker_trips: u64) -> CacheMetrics {
        let m = self.inner.lock();
        let total_ops = m.hits + m.misses + m.errors + m.timeouts;
        let lookups = m.hits + m.misses;
        CacheMetrics {
            hits: m.hits,
            misses: m.misses,
            errors: m.errors,
            timeouts: m.timeouts,
            oversize_rejections: m.oversize,
            total_operations: total_ops,
            total_bytes_read: m.total_bytes_read,
            total_bytes_written: m.total_bytes_written,
            avg_read_time_ms: if m.reads > 0 {
                m.total_read_time_ms / m.reads as f64
            } else {
                0.0
            },
            avg_write_time_ms: if m.writes > 0 {
                m.total_write_time_ms / m.writes as f64
            } else {
                0.0
            },
            hit_rate: if lookups > 0 {
                m.hits as f64 / lookups as f64
            } else {
                0.0
            },
            error_rate: if total_ops > 0 {
                m.errors as f64 / total_ops as f64
            } else {
                0.0
            },
            circuit_breaker_trips: breaker_trips,
            compression_ratio: if m.raw_bytes > 0 {
                m.stored_bytes as f64 / m.raw_bytes as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_operations_is_sum_of_outcomes() {
        let metrics = SharedMetrics::new();
        metrics.record_hit(128, 0.5);
        metrics.record_hit(64, 0.3);
        metrics.record_miss(0.2);
        metrics.record_error();
        metrics.record_timeout();

        let snap = metrics.snapshot(0);
        assert_eq!(snap.total_operations, snap.hits + snap.misses + snap.errors + snap.timeouts);
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn compression_ratio_tracks_stored_over_raw() {
        let metrics = SharedMetrics::new();
        metrics.record_write(1000, 400, 1.0);
        let snap = metrics.snapshot(0);
        assert!((snap.compression_ratio - 0.4).abs() < 1e-9);
        assert_eq!(snap.total_bytes_written, 400);
    }
}
