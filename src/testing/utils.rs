use crate::store::{SimulatedFaults, SimulatedStore, SimulatedStoreConfig, StoreHandle};
use std::sync::Arc;
use std::time::Duration;

/// Three-member set with the given faults and the default 2 s election.
pub(crate) fn store_with(faults: SimulatedFaults) -> SimulatedStore {
    SimulatedStore::new(SimulatedStoreConfig::default().with_faults(faults))
}

/// Three-member set whose secondaries trail the primary by exactly `lag_ms`.
pub(crate) fn lagged_store(lag_ms: u64) -> SimulatedStore {
    store_with(SimulatedFaults::none().with_replication_lag(Duration::from_millis(lag_ms)))
}

/// Every write fails; `w:0` writers never find out.
pub(crate) fn failing_writes_store() -> SimulatedStore {
    store_with(SimulatedFaults {
        write_failure_probability: 1.0,
        ..SimulatedFaults::none()
    })
}

pub(crate) fn shared(store: &SimulatedStore) -> Arc<dyn StoreHandle> {
    Arc::new(store.clone())
}
