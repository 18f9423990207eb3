//! Probe and benchmark engine.
//!
//! Each suite owns one scratch namespace for the duration of its run:
//!
//! ```text
//!   prepare_namespace ──► sub-experiments ──► drop_namespace
//!          │                                       ▲
//!          └── failure: Error::NamespaceSetup      └── always attempted
//! ```
//!
//! Inside a suite, per-operation failures are counted, never propagated.

mod consistency;
mod durability;
mod poll;
mod replication;
mod workload;

pub use consistency::{
    CausalReport, ConsistencyProbe, ConsistencyReport, EventualReport, StrongReport,
};
pub use durability::{DurabilityBenchmark, DurabilityReport, LevelReport};
pub use poll::{poll_until, Backoff, PollOutcome, PollPolicy};
pub use replication::{
    FailoverReport, PropagationReport, ReadPreferenceReport, ReplicationProbe,
    ReplicationReport, RoutingSample,
};
pub use workload::{BackgroundWorkload, WorkloadContext, WorkloadOutcome};

use crate::error::{Error, Result};
use crate::store::StoreHandle;
use std::future::Future;
use tracing::{error, info, warn};

/// Run `body` against a freshly prepared `namespace`, dropping it afterwards.
///
/// Only a failure to prepare the namespace is an error; a failed drop is
/// logged.
pub async fn with_namespace<T, F, Fut>(
    store: &dyn StoreHandle,
    namespace: &str,
    body: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if let Err(source) = store.prepare_namespace(namespace).await {
        error!(namespace, error = %source, "cannot prepare namespace");
        return Err(Error::NamespaceSetup {
            namespace: namespace.to_string(),
            source,
        });
    }
    info!(namespace, "namespace ready");

    let output = body().await;

    match store.drop_namespace(namespace).await {
        Ok(()) => info!(namespace, "namespace dropped"),
        Err(e) => warn!(namespace, error = %e, "namespace cleanup failed"),
    }
    Ok(output)
}

/// Short random suffix keeping record keys unique across runs.
pub(crate) fn key_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SimulatedFaults, SimulatedStore, SimulatedStoreConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_namespace_dropped_after_body() {
        let store = SimulatedStore::with_defaults();
        let handle = &store;
        let seen = with_namespace(&store, "scoped", move || async move {
            handle.has_namespace("scoped")
        })
        .await
        .unwrap();

        assert!(seen);
        assert!(!store.has_namespace("scoped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_skips_body() {
        let store = SimulatedStore::new(SimulatedStoreConfig::default().with_faults(
            SimulatedFaults {
                fail_namespace_setup: true,
                ..SimulatedFaults::none()
            },
        ));
        let ran = AtomicBool::new(false);
        let flag = &ran;
        let result = with_namespace(&store, "scoped", move || async move {
            flag.store(true, Ordering::SeqCst)
        })
        .await;

        assert!(matches!(result, Err(Error::NamespaceSetup { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_key_suffix_unique() {
        let a = key_suffix();
        let b = key_suffix();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
