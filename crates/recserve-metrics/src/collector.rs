//! Metrics collector: in-process counters and gauges.
//!
//! Counters are atomics stored behind a read-mostly map: the write lock is
//! only taken the first time a label set is seen, every later increment is a
//! `fetch_add` under the read lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::sink::{MetricsSink, SwitchStatus, VersionLabels};

/// Upper bounds (seconds) of the request latency histogram buckets.
pub const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Counter family keyed by a label tuple.
pub(crate) struct LabeledCounter<K> {
    values: RwLock<HashMap<K, AtomicU64>>,
}

impl<K: Eq + Hash + Clone + Ord> LabeledCounter<K> {
    fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    fn inc(&self, key: K) {
        {
            let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(v) = values.get(&key) {
                v.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, key: &K) -> u64 {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(key)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All label sets with their values, sorted by label.
    pub(crate) fn sorted(&self) -> Vec<(K, u64)> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(K, u64)> = values
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Cumulative latency histogram.
pub(crate) struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, latency: Duration) {
        let secs = latency.as_secs_f64();
        for (bound, bucket) in LATENCY_BUCKETS.iter().zip(&self.buckets) {
            if secs <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// `(cumulative bucket counts, sum in seconds, count)`.
    pub(crate) fn read(&self) -> (Vec<u64>, f64, u64) {
        let buckets = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        (buckets, sum, self.count.load(Ordering::Relaxed))
    }
}

/// Collects serving metrics for one process.
pub struct MetricsCollector {
    /// `(from_version, to_version, status)`.
    pub(crate) switches: LabeledCounter<(String, String, SwitchStatus)>,
    /// `(http status, variant label)`.
    pub(crate) requests: LabeledCounter<(u16, String)>,
    /// `(version, "ok" | "error")`.
    pub(crate) shadow: LabeledCounter<(String, &'static str)>,
    pub(crate) latency: LatencyHistogram,
    pub(crate) current_version: RwLock<Option<VersionLabels>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            switches: LabeledCounter::new(),
            requests: LabeledCounter::new(),
            shadow: LabeledCounter::new(),
            latency: LatencyHistogram::new(),
            current_version: RwLock::new(None),
        }
    }

    /// Record one `/recommend` request. `variant` is `"none"` outside
    /// experiments.
    pub fn record_request(&self, variant: &str, status: u16, latency: Duration) {
        self.requests.inc((status, variant.to_string()));
        self.latency.observe(latency);
    }

    /// Record the outcome of a background shadow invocation.
    pub fn record_shadow(&self, version: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.shadow.inc((version.to_string(), status));
    }

    pub fn switch_count(&self, from_version: &str, to_version: &str, status: SwitchStatus) -> u64 {
        self.switches
            .get(&(from_version.to_string(), to_version.to_string(), status))
    }

    /// Total switch attempts across all label sets.
    pub fn total_switches(&self) -> u64 {
        self.switches.sorted().iter().map(|(_, v)| v).sum()
    }

    pub fn request_count(&self, variant: &str, status: u16) -> u64 {
        self.requests.get(&(status, variant.to_string()))
    }

    pub fn shadow_count(&self, version: &str, ok: bool) -> u64 {
        let status = if ok { "ok" } else { "error" };
        self.shadow.get(&(version.to_string(), status))
    }

    pub fn current_version(&self) -> Option<VersionLabels> {
        self.current_version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for MetricsCollector {
    fn record_switch(&self, from_version: &str, to_version: &str, status: SwitchStatus) {
        self.switches
            .inc((from_version.to_string(), to_version.to_string(), status));
        debug!(from = %from_version, to = %to_version, %status, "switch outcome recorded");
    }

    fn set_current_version(&self, labels: &VersionLabels) {
        let mut current = self
            .current_version
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Some(labels.clone());
    }
}
