//! Empirical probes for replicated data stores.
//!
//! This crate drives controlled workloads against a replica set and reports
//! what it observes:
//! - **Consistency**: majority read-back, eventual propagation delay, causal
//!   ordering across a session boundary, and majority operations racing a
//!   forced stepdown
//! - **Replication**: write propagation to secondaries, latency per read
//!   routing mode, and time to a new primary after failover
//! - **Durability**: batch insert latency across write-concern levels
//!
//! It samples and reports; it does not prove a consistency model holds.
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_probe::{ExperimentOrchestrator, ProbeConfig, SimulatedStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SimulatedStore::with_defaults());
//!     let orchestrator = ExperimentOrchestrator::new(store, ProbeConfig::default())?;
//!
//!     if let Some(report) = orchestrator.run(Some("consistency")).await? {
//!         println!("violations: {}", report.violation_count());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          ExperimentOrchestrator             │
//! │  select suite → run → summary lines         │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌───────────┐ ┌────────────┐ ┌─────────────┐
//! │Consistency│ │Replication │ │ Durability  │
//! │  Probe    │ │  Probe     │ │ Benchmark   │
//! └───────────┘ └────────────┘ └─────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │     StoreHandle (simulated | mongo)         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Error model
//!
//! Single-operation failures are counted, never propagated. Administrative
//! failures (stepdown, status) come back as [`AdminError`] and the probe
//! carries on assuming the cluster is unchanged. Only a scratch namespace
//! that cannot be created aborts a suite.

pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConsistencyConfig, DurabilityConfig, ProbeConfig, ReplicationConfig};
pub use error::{AdminError, Error, Result, StoreError};
pub use metrics::{StatsAccumulator, StatsSnapshot};
pub use orchestrator::{ExperimentOrchestrator, Suite, SuiteReport};
pub use probe::{ConsistencyProbe, DurabilityBenchmark, ReplicationProbe};
pub use store::{
    CausalSession, SimulatedFaults, SimulatedStore, SimulatedStoreConfig, StoreHandle,
};
pub use types::{
    ClusterStatus, ConsistencyLevel, Durability, ExperimentResult, Outcome, ProbeRecord,
    ReadConsistency, ReadRouting, ViolationKind, ViolationReport, WriteDurability,
};
