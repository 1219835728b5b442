// promptgate-core/src/telemetry.rs
//! In-process scan telemetry: status counters, a fixed-bucket latency
//! histogram, per-dataset match counters, and an active-request gauge.
//!
//! Counters are relaxed atomics; the snapshot is advisory and serializable
//! for the metrics surface. Wire-format export lives outside this crate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::verdict::ScanStatus;

/// Upper bounds (milliseconds) of the scan-duration histogram buckets.
const LATENCY_BOUNDS_MS: [u64; 8] = [1, 2, 5, 10, 25, 50, 100, 500];

#[derive(Debug, Default)]
struct LatencyHistogram {
    // One counter per bound, plus an overflow bucket.
    buckets: [AtomicU64; LATENCY_BOUNDS_MS.len() + 1],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    fn observe(&self, ms: u64) {
        let idx = LATENCY_BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// One histogram bucket in a snapshot: count of observations at or under `le`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub le: String,
    pub count: u64,
}

/// Serializable view of all counters at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_by_status: BTreeMap<String, u64>,
    pub scan_duration_ms: Vec<HistogramBucket>,
    pub scan_duration_sum_ms: u64,
    pub scan_duration_count: u64,
    pub rule_matches: BTreeMap<String, u64>,
    pub regex_timeouts: u64,
    pub reload_failures: u64,
    pub active_requests: i64,
}

/// Shared scan telemetry. Cheap to clone via `Arc`.
#[derive(Debug, Default)]
pub struct ScannerMetrics {
    requests: [AtomicU64; ScanStatus::ALL.len()],
    latency: LatencyHistogram,
    /// Keyed by `dataset/severity`.
    rule_matches: RwLock<BTreeMap<String, u64>>,
    regex_timeouts: AtomicU64,
    reload_failures: AtomicU64,
    active_requests: AtomicI64,
}

impl ScannerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks a request in flight; the gauge drops when the guard does.
    pub fn begin_request(self: &Arc<Self>) -> ActiveRequestGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        ActiveRequestGuard { metrics: Arc::clone(self) }
    }

    pub fn record_scan(&self, status: ScanStatus, duration_ms: u64) {
        let idx = ScanStatus::ALL.iter().position(|&s| s == status).unwrap_or(0);
        self.requests[idx].fetch_add(1, Ordering::Relaxed);
        self.latency.observe(duration_ms);
    }

    pub fn record_rule_match(&self, dataset: &str, severity: &str) {
        let key = format!("{}/{}", dataset, severity);
        *self.rule_matches.write().unwrap().entry(key).or_default() += 1;
    }

    pub fn record_regex_timeout(&self) {
        self.regex_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload_failure(&self) {
        self.reload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_by_status = ScanStatus::ALL
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str().to_string(), self.requests[i].load(Ordering::Relaxed)))
            .collect();

        let mut scan_duration_ms: Vec<HistogramBucket> = LATENCY_BOUNDS_MS
            .iter()
            .enumerate()
            .map(|(i, bound)| HistogramBucket {
                le: bound.to_string(),
                count: self.latency.buckets[i].load(Ordering::Relaxed),
            })
            .collect();
        scan_duration_ms.push(HistogramBucket {
            le: "+Inf".to_string(),
            count: self.latency.buckets[LATENCY_BOUNDS_MS.len()].load(Ordering::Relaxed),
        });

        MetricsSnapshot {
            requests_by_status,
            scan_duration_ms,
            scan_duration_sum_ms: self.latency.sum_ms.load(Ordering::Relaxed),
            scan_duration_count: self.latency.count.load(Ordering::Relaxed),
            rule_matches: self.rule_matches.read().unwrap().clone(),
            regex_timeouts: self.regex_timeouts.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
        }
    }
}

/// RAII guard backing the active-request gauge.
#[derive(Debug)]
pub struct ActiveRequestGuard {
    metrics: Arc<ScannerMetrics>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}
