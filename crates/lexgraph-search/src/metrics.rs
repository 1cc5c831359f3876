//! In-process metrics: counters, duration histograms, and gauges.
//!
//! The registry is shared by every component and snapshotted for the
//! metrics surface. Counters and gauges are plain atomics behind a map;
//! histograms keep a bounded reservoir of recent samples for percentile
//! estimation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Maximum samples retained per histogram.
const RESERVOIR_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Histogram {
    /// Ring buffer of recent samples in microseconds
    samples: Vec<u64>,
    next: usize,
    count: u64,
    sum_micros: u64,
}

impl Histogram {
    fn record(&mut self, micros: u64) {
        if self.samples.len() < RESERVOIR_CAPACITY {
            self.samples.push(micros);
        } else {
            self.samples[self.next] = micros;
            self.next = (self.next + 1) % RESERVOIR_CAPACITY;
        }
        self.count += 1;
        self.sum_micros += micros;
    }

    fn percentile(&self, p: f64) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[idx]
    }

    fn summary(&self) -> TimingSummary {
        TimingSummary {
            count: self.count,
            p50_ms: self.percentile(0.50) as f64 / 1000.0,
            p95_ms: self.percentile(0.95) as f64 / 1000.0,
            mean_ms: if self.count == 0 {
                0.0
            } else {
                self.sum_micros as f64 / self.count as f64 / 1000.0
            },
        }
    }
}

/// Percentile summary for one operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimingSummary {
    pub count: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub mean_ms: f64,
}

/// Point-in-time view of all metrics.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
    pub timings: BTreeMap<String, TimingSummary>,
    /// Derived cache hit ratio in [0, 1], when any cache traffic happened
    pub cache_hit_ratio: Option<f64>,
    pub last_schema_verification: Option<DateTime<Utc>>,
}

/// Shared metrics registry.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, u64>>,
    gauges: RwLock<BTreeMap<String, i64>>,
    timings: RwLock<BTreeMap<String, Histogram>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    /// Increment a counter by `delta`.
    pub fn incr_by(&self, name: &str, delta: u64) {
        *self.counters.write().entry(name.to_string()).or_insert(0) += delta;
    }

    /// Set a gauge to an absolute value.
    pub fn set_gauge(&self, name: &str, value: i64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    /// Record one duration sample for an operation.
    pub fn observe(&self, op: &str, elapsed: Duration) {
        self.timings
            .write()
            .entry(op.to_string())
            .or_default()
            .record(elapsed.as_micros() as u64);
    }

    /// Read a counter (0 when never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Produce a snapshot for the metrics surface.
    pub fn snapshot(&self, last_schema_verification: Option<DateTime<Utc>>) -> MetricsSnapshot {
        let counters = self.counters.read().clone();
        let gauges = self.gauges.read().clone();
        let timings = self
            .timings
            .read()
            .iter()
            .map(|(op, hist)| (op.clone(), hist.summary()))
            .collect();

        let hits = counters.get("cache.hits").copied().unwrap_or(0);
        let misses = counters.get("cache.misses").copied().unwrap_or(0);
        let cache_hit_ratio = if hits + misses > 0 {
            Some(hits as f64 / (hits + misses) as f64)
        } else {
            None
        };

        MetricsSnapshot {
            counters,
            gauges,
            timings,
            cache_hit_ratio,
            last_schema_verification,
        }
    }
}
