//! Atomic counters shared between concurrent workload tasks.

use crate::error::StoreError;
use crate::types::OperationCounts;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic tally.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A counter keyed by a single label, e.g. the kind of error.
#[derive(Debug, Default)]
pub struct LabeledCounter {
    counters: parking_lot::RwLock<HashMap<&'static str, AtomicU64>>,
}

impl LabeledCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `label`.
    pub fn inc(&self, label: &'static str) {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(label) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut counters = self.counters.write();
        counters
            .entry(label)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// All labels with their values, sorted by label.
    pub fn get_all(&self) -> Vec<(&'static str, u64)> {
        let mut all: Vec<_> = self
            .counters
            .read()
            .iter()
            .map(|(k, v)| (*k, v.load(Ordering::Relaxed)))
            .collect();
        all.sort_unstable();
        all
    }
}

/// Outcome tallies for one background workload.
///
/// An instance is handed (behind an `Arc`) to every task contributing to the
/// workload; all updates are atomic so contributors never coordinate.
#[derive(Debug)]
pub struct WorkloadCounters {
    attempted: Counter,
    succeeded: Counter,
    failed: Counter,
    missed: Counter,
    errors: LabeledCounter,
}

impl Default for WorkloadCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkloadCounters {
    pub fn new() -> Self {
        Self {
            attempted: Counter::new(),
            succeeded: Counter::new(),
            failed: Counter::new(),
            missed: Counter::new(),
            errors: LabeledCounter::new(),
        }
    }

    /// Mark the start of an operation.
    pub fn record_attempt(&self) {
        self.attempted.inc();
    }

    pub fn record_success(&self) {
        self.succeeded.inc();
    }

    /// A read that completed but found nothing.
    pub fn record_miss(&self) {
        self.missed.inc();
    }

    pub fn record_failure(&self, error: &StoreError) {
        self.failed.inc();
        self.errors.inc(error.kind());
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.get()
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.get()
    }

    pub fn failed(&self) -> u64 {
        self.failed.get()
    }

    pub fn missed(&self) -> u64 {
        self.missed.get()
    }

    /// Operations that finished one way or another.
    pub fn completed(&self) -> u64 {
        self.succeeded() + self.failed() + self.missed()
    }

    /// Failure counts grouped by error kind.
    pub fn errors_by_kind(&self) -> Vec<(&'static str, u64)> {
        self.errors.get_all()
    }

    /// Fold into [`OperationCounts`], treating the unfinished remainder of
    /// `planned` as inconclusive.
    pub fn to_counts(&self, planned: u64) -> OperationCounts {
        let completed = self.completed();
        OperationCounts {
            attempted: self.attempted(),
            succeeded: self.succeeded(),
            failed: self.failed() + self.missed(),
            inconclusive: planned.saturating_sub(completed),
        }
    }
}
