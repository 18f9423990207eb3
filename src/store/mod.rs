//! Abstraction over the replicated store being probed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │         ConsistencyProbe / ReplicationProbe / ...         │
//! │                                                          │
//! │          store: Arc<dyn StoreHandle>                      │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   StoreHandle trait                       │
//! └──────────────────────────────────────────────────────────┘
//!              │                               │
//!              ▼                               ▼
//!   ┌────────────────────┐         ┌────────────────────────┐
//!   │  SimulatedStore    │         │  MongoStore            │
//!   │  (in-process       │         │  (feature = "mongo")   │
//!   │   replica set)     │         │                        │
//!   └────────────────────┘         └────────────────────────┘
//! ```
//!
//! Every call is a single attempt: implementations never retry, and a
//! failure comes back as an error value. A read of an absent key is
//! `Ok(None)`, not an error. Callers time operations themselves with
//! [`timed`].

mod simulated;

#[cfg(feature = "mongo")]
mod mongo;

pub use simulated::{SimulatedFaults, SimulatedStats, SimulatedStore, SimulatedStoreConfig};

#[cfg(feature = "mongo")]
pub use mongo::MongoStore;

use crate::error::{AdminError, StoreError};
use crate::types::{ClusterStatus, ProbeRecord, ReadConsistency, ReadRouting, WriteDurability};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Typed operations against a replicated store.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Drop and recreate `namespace` so a suite starts from nothing.
    async fn prepare_namespace(&self, namespace: &str) -> Result<(), StoreError>;

    /// Remove `namespace` and everything in it.
    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError>;

    /// Delete every record in `namespace`, keeping the namespace.
    async fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError>;

    /// Insert one record.
    async fn write(
        &self,
        namespace: &str,
        record: &ProbeRecord,
        durability: WriteDurability,
    ) -> Result<(), StoreError>;

    /// Insert a batch of records in one call.
    async fn write_batch(
        &self,
        namespace: &str,
        records: &[ProbeRecord],
        durability: WriteDurability,
    ) -> Result<(), StoreError>;

    /// Point lookup by key.
    async fn read(
        &self,
        namespace: &str,
        key: &str,
        routing: ReadRouting,
        consistency: ReadConsistency,
    ) -> Result<Option<ProbeRecord>, StoreError>;

    /// Open a causally consistent session scoped to `namespace`.
    async fn causal_session(&self, namespace: &str)
        -> Result<Box<dyn CausalSession>, StoreError>;

    /// Fetch member roles and health.
    async fn cluster_status(&self) -> Result<ClusterStatus, AdminError>;

    /// Ask the primary to step down and stay ineligible for `grace`.
    async fn step_down(&self, grace: Duration) -> Result<(), AdminError>;
}

/// A session whose writes are applied in issue order.
///
/// Observation happens outside the session through plain secondary reads.
#[async_trait]
pub trait CausalSession: Send {
    async fn write(
        &mut self,
        record: &ProbeRecord,
        durability: WriteDurability,
    ) -> Result<(), StoreError>;
}

/// A value paired with the time it took to produce.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    pub latency: Duration,
}

/// Run `fut` and measure its wall-clock duration.
pub async fn timed<F, T>(fut: F) -> Timed<T>
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let value = fut.await;
    Timed {
        value,
        latency: start.elapsed(),
    }
}

/// Fetch cluster status, degrading any failure to an unknown snapshot.
pub async fn status_or_unknown(store: &dyn StoreHandle) -> ClusterStatus {
    match store.cluster_status().await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "cluster status unavailable");
            ClusterStatus::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timed_measures_sleep() {
        let result = timed(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            7
        })
        .await;
        assert_eq!(result.value, 7);
        assert!(result.latency >= Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_or_unknown_degrades() {
        let store = SimulatedStore::new(
            SimulatedStoreConfig::default().with_faults(SimulatedFaults {
                status_unavailable: true,
                ..SimulatedFaults::none()
            }),
        );
        let status = status_or_unknown(&store).await;
        assert_eq!(status, ClusterStatus::unknown());
        assert_eq!(status.primary(), None);
    }
}
