//! Latency statistics over one experiment run.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Collects latency samples and summarises them on demand.
///
/// Samples are kept as integer nanoseconds and every statistic is computed
/// over the sorted sample set, so the snapshot is bit-for-bit identical for
/// any arrival order. Safe to share between concurrent contributors.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    samples: Mutex<Vec<u64>>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one latency sample.
    pub fn record(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.samples.lock().push(nanos);
    }

    /// Fold another accumulator's samples into this one.
    pub fn merge(&self, other: &StatsAccumulator) {
        let incoming = other.samples.lock().clone();
        self.samples.lock().extend(incoming);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Drop all samples.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Summarise the samples, or `None` when there are none.
    pub fn snapshot(&self) -> Option<StatsSnapshot> {
        let mut sorted = self.samples.lock().clone();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();

        let count = sorted.len() as u64;
        let total: u128 = sorted.iter().map(|&s| s as u128).sum();
        let mean = total as f64 / count as f64;

        // Sample (n - 1) variance; a single sample has no spread.
        let std_dev = if count > 1 {
            let sum_sq: f64 = sorted
                .iter()
                .map(|&s| {
                    let d = s as f64 - mean;
                    d * d
                })
                .sum();
            (sum_sq / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        Some(StatsSnapshot {
            count,
            total_ms: total as f64 / NANOS_PER_MILLI,
            mean_ms: mean / NANOS_PER_MILLI,
            min_ms: sorted[0] as f64 / NANOS_PER_MILLI,
            max_ms: sorted[sorted.len() - 1] as f64 / NANOS_PER_MILLI,
            std_dev_ms: std_dev / NANOS_PER_MILLI,
            p50_ms: nearest_rank(&sorted, 50.0) as f64 / NANOS_PER_MILLI,
            p99_ms: nearest_rank(&sorted, 99.0) as f64 / NANOS_PER_MILLI,
        })
    }
}

/// Nearest-rank percentile over an already sorted, non-empty slice.
fn nearest_rank(sorted: &[u64], p: f64) -> u64 {
    let rank = (sorted.len() as f64 * p / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Summary statistics, all latencies in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: u64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Sample standard deviation.
    pub std_dev_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
}
