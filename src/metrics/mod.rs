//! Measurement primitives for the probes.
//!
//! - [`StatsAccumulator`] folds latency samples into mean/min/max/std/percentiles
//! - [`WorkloadCounters`] tallies outcomes from concurrent workload tasks
//!
//! # Example
//!
//! ```rust
//! use replica_probe::metrics::StatsAccumulator;
//! use std::time::Duration;
//!
//! let stats = StatsAccumulator::new();
//! stats.record(Duration::from_millis(12));
//! stats.record(Duration::from_millis(18));
//!
//! let snapshot = stats.snapshot().expect("two samples");
//! assert_eq!(snapshot.mean_ms, 15.0);
//! ```

mod counters;
mod stats;

pub use counters::{Counter, LabeledCounter, WorkloadCounters};
pub use stats::{StatsAccumulator, StatsSnapshot};

/// Convert a duration to fractional milliseconds for log fields.
pub fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
