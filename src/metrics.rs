//! Thread-safe counters, gauges, and per-operation latency percentiles.
//!
//! A [`MetricsCollector`] is owned per service instance (shared via `Arc`),
//! never a process-wide singleton, so independent services in one process do
//! not interfere. Counters increment atomically; latency samples live behind
//! their own lock, separate from the service's cache lock, to keep the stats
//! and cache paths from contending with each other.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use serde::Serialize;

/// Latency summary for one operation, in microseconds.
///
/// An operation with no samples reports all zeroes, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: f64,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub min_us: f64,
    pub max_us: f64,
}

#[derive(Default)]
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: Mutex<HashMap<String, f64>>,
    latencies: Mutex<HashMap<String, Vec<u64>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one latency sample for `operation`.
    pub fn record_latency(&self, operation: &str, latency_us: u64) {
        let mut latencies = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        latencies
            .entry(operation.to_string())
            .or_default()
            .push(latency_us);
    }

    /// Atomically increment a named counter, creating it at zero first if
    /// needed. The write lock is only taken on first sight of a name; the
    /// steady state is a shared read lock plus one atomic add.
    pub fn increment_counter(&self, name: &str) {
        {
            let counters = self
                .counters
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a gauge value; last write wins.
    pub fn record_gauge(&self, name: &str, value: f64) {
        let mut gauges = self
            .gauges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        gauges.insert(name.to_string(), value);
    }

    /// Current counter value, 0 for unknown names.
    pub fn counter(&self, name: &str) -> u64 {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters
            .get(name)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Latest gauge value, if one was ever recorded.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        let gauges = self
            .gauges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        gauges.get(name).copied()
    }

    /// Percentile summary of all samples recorded for `operation`.
    pub fn latency_stats(&self, operation: &str) -> LatencyStats {
        let latencies = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(samples) = latencies.get(operation).filter(|s| !s.is_empty()) else {
            return LatencyStats::default();
        };

        let mut sorted = samples.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        LatencyStats {
            count: sorted.len() as u64,
            mean_us: sum as f64 / sorted.len() as f64,
            p50_us: percentile(&sorted, 0.50),
            p95_us: percentile(&sorted, 0.95),
            p99_us: percentile(&sorted, 0.99),
            min_us: sorted[0] as f64,
            max_us: sorted[sorted.len() - 1] as f64,
        }
    }

    /// Start a scoped timer that records into `operation` when dropped, on
    /// every exit path.
    pub fn start_timer<'a>(&'a self, operation: &'a str) -> LatencyTimer<'a> {
        LatencyTimer {
            collector: self,
            operation,
            start: Instant::now(),
        }
    }

    /// Human-readable dump of all counters, gauges, and latency summaries.
    /// The formatting is for operators, not a stable contract.
    pub fn report(&self) -> String {
        let mut out = String::from("=== Metrics Report ===\n");

        let counters = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut counter_names: Vec<_> = counters.keys().collect();
        counter_names.sort();
        out.push_str("\nCounters:\n");
        for name in counter_names {
            let _ = writeln!(out, "  {name}: {}", counters[name].load(Ordering::Relaxed));
        }
        drop(counters);

        let gauges = self
            .gauges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !gauges.is_empty() {
            let mut gauge_names: Vec<_> = gauges.keys().collect();
            gauge_names.sort();
            out.push_str("\nGauges:\n");
            for name in gauge_names {
                let _ = writeln!(out, "  {name}: {:.2}", gauges[name]);
            }
        }
        drop(gauges);

        let operations: Vec<String> = {
            let latencies = self
                .latencies
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut names: Vec<_> = latencies.keys().cloned().collect();
            names.sort();
            names
        };
        if !operations.is_empty() {
            out.push_str("\nLatencies (microseconds):\n");
            for operation in operations {
                let stats = self.latency_stats(&operation);
                let _ = writeln!(out, "  {operation}:");
                let _ = writeln!(out, "    count: {}", stats.count);
                let _ = writeln!(out, "    mean:  {:.2}", stats.mean_us);
                let _ = writeln!(out, "    p50:   {:.2}", stats.p50_us);
                let _ = writeln!(out, "    p95:   {:.2}", stats.p95_us);
                let _ = writeln!(out, "    p99:   {:.2}", stats.p99_us);
                let _ = writeln!(out, "    min:   {:.2}", stats.min_us);
                let _ = writeln!(out, "    max:   {:.2}", stats.max_us);
            }
        }

        out
    }

    /// Drop all samples and gauges, zero all counters.
    pub fn reset(&self) {
        self.latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.gauges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        let counters = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for counter in counters.values() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Interpolated percentile over pre-sorted samples: rank `p * (n-1)`, with
/// linear interpolation between the two nearest ranks.
pub(crate) fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let index = p * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return sorted[lower] as f64;
    }

    let weight = index - lower as f64;
    sorted[lower] as f64 * (1.0 - weight) + sorted[upper] as f64 * weight
}

/// Scoped latency timer; records on drop so early returns and error paths are
/// accounted for too.
pub struct LatencyTimer<'a> {
    collector: &'a MetricsCollector,
    operation: &'a str,
    start: Instant,
}

impl LatencyTimer<'_> {
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.collector
            .record_latency(self.operation, self.elapsed_us());
    }
}
