//! Scenario tests driving whole probes against the simulated replica set.
//!
//! Every scenario runs on tokio's paused clock, so replication lag, election
//! delays and poll backoff advance deterministically and a 25 s failover
//! timeout completes instantly.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  *_scenarios.rs              │  one probe or suite per file
//! └──────────────────────────────┘
//!               │
//!               ▼
//! ┌──────────────────────────────┐
//! │  utils.rs                    │  store builders with fault presets
//! └──────────────────────────────┘
//!               │
//!               ▼
//! ┌──────────────────────────────┐
//! │  SimulatedStore              │  lag, reordering, elections, failures
//! └──────────────────────────────┘
//! ```
//!
//! # Fault knobs used here
//!
//! - `with_replication_lag(d)` - fixed delay before secondaries see a write
//! - `reorder_replication` - dependent records overtake their causes
//! - `never_elect` - a stepdown hands leadership back to the old primary
//! - `write_failure_probability` - injected write failures
//! - `fail_namespace_setup` - the scratch namespace cannot be created

mod consistency_scenarios;
mod durability_scenarios;
mod orchestrator_scenarios;
mod replication_scenarios;
mod utils;
