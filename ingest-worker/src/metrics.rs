use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Histogram bucket upper bounds, in milliseconds.
const LATENCY_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000];

#[derive(Debug, Default)]
struct Histogram {
    // One slot per bound plus overflow.
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    fn record(&self, latency_ms: u64) {
        let slot = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| latency_ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }
}

/// Snapshot of one action's latency distribution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub action: String,
    pub count: u64,
    pub sum_ms: u64,
    pub buckets: Vec<(String, u64)>,
}

/// Worker counters and per-action latency histograms.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub received: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub dead_lettered: AtomicU64,
    histograms: DashMap<String, Histogram>,
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub latency: Vec<LatencySnapshot>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, action: &str, latency_ms: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.histograms
            .entry(action.to_string())
            .or_default()
            .record(latency_ms);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Failure ratio over everything received so far.
    pub fn error_rate(&self) -> f64 {
        let received = self.received.load(Ordering::Relaxed);
        if received == 0 {
            return 0.0;
        }
        self.failed.load(Ordering::Relaxed) as f64 / received as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self
            .histograms
            .iter()
            .map(|entry| {
                let histogram = entry.value();
                let mut buckets: Vec<(String, u64)> = LATENCY_BUCKETS_MS
                    .iter()
                    .enumerate()
                    .map(|(i, bound)| {
                        (
                            format!("le_{bound}"),
                            histogram.buckets[i].load(Ordering::Relaxed),
                        )
                    })
                    .collect();
                buckets.push((
                    "le_inf".to_string(),
                    histogram.buckets[LATENCY_BUCKETS_MS.len()].load(Ordering::Relaxed),
                ));
                LatencySnapshot {
                    action: entry.key().clone(),
                    count: histogram.count.load(Ordering::Relaxed),
                    sum_ms: histogram.sum_ms.load(Ordering::Relaxed),
                    buckets,
                }
            })
            .collect();

        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = WorkerMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_processed("auth.login.success", 12);
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.failed, 1);
        assert!((metrics.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_bucketing() {
        let metrics = WorkerMetrics::new();
        metrics.record_processed("data.read", 3); // le_5
        metrics.record_processed("data.read", 80); // le_100
        metrics.record_processed("data.read", 9_000); // le_inf

        let snapshot = metrics.snapshot();
        let histogram = snapshot
            .latency
            .iter()
            .find(|h| h.action == "data.read")
            .unwrap();
        assert_eq!(histogram.count, 3);
        assert_eq!(histogram.sum_ms, 9_083);

        let bucket = |name: &str| {
            histogram
                .buckets
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
                .unwrap()
        };
        assert_eq!(bucket("le_5"), 1);
        assert_eq!(bucket("le_100"), 1);
        assert_eq!(bucket("le_inf"), 1);
    }

    #[test]
    fn test_error_rate_empty() {
        assert_eq!(WorkerMetrics::new().error_rate(), 0.0);
    }
}
