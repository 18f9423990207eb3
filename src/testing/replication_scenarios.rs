//! Replication probe scenarios.
//!
//! These tests verify:
//! - propagated records never exceed the records written
//! - unacknowledged writes that silently fail show up only as a low percentage
//! - writes issued during an election wait for the new primary and succeed
//! - a set that never elects a new primary yields a failover timeout within
//!   the configured bound
//! - a store whose reads all fail leaves the routing comparison inconclusive

#[cfg(test)]
mod tests {
    use crate::config::ReplicationConfig;
    use crate::probe::ReplicationProbe;
    use crate::store::{SimulatedFaults, SimulatedStore};
    use crate::testing::utils::{failing_writes_store, lagged_store, shared, store_with};
    use crate::types::{Outcome, ViolationKind, WriteDurability};
    use std::time::Duration;
    use tokio::time::Instant;

    fn probe_for(store: &SimulatedStore, config: ReplicationConfig) -> ReplicationProbe {
        ReplicationProbe::new(shared(store), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_bounded_by_total() {
        for total in [1u32, 2, 7, 50] {
            let config = ReplicationConfig::default().with_propagation_count(total);

            let clean = lagged_store(0);
            let report = probe_for(&clean, config.clone()).write_propagation().await;
            assert_eq!(report.propagated, u64::from(total));
            assert_eq!(report.pct, 100.0);
            assert_eq!(report.result.outcome, Outcome::Passed);

            let noisy = store_with(SimulatedFaults::moderate());
            let report = probe_for(&noisy, config).write_propagation().await;
            assert!(report.written <= u64::from(total));
            assert!(report.propagated <= report.written);
            assert!((0.0..=100.0).contains(&report.pct));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_losses_lower_percentage() {
        let store = failing_writes_store();
        let config = ReplicationConfig::default()
            .with_propagation_count(50)
            .with_propagation_durability(WriteDurability::unacknowledged());
        let report = probe_for(&store, config).write_propagation().await;

        // w:0 reports every insert as written
        assert_eq!(report.written, 50);
        assert_eq!(report.propagated, 0);
        assert_eq!(report.pct, report.propagated as f64 / 50.0 * 100.0);
        assert_eq!(report.result.outcome, Outcome::Failed);
        assert_eq!(store.stats().writes_applied, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_writes_straddle_election() {
        let store = lagged_store(0);
        let report = probe_for(&store, ReplicationConfig::default()).failover().await;

        assert_eq!(report.result.outcome, Outcome::Passed);
        assert_ne!(report.new_primary, report.old_primary);
        let elapsed = report.elapsed_ms.unwrap();
        assert!((2000.0..=3000.0).contains(&elapsed), "elapsed {}", elapsed);
        // writes wait out the election instead of failing
        assert_eq!(report.workload.succeeded, 20);
        assert_eq!(report.workload.failed, 0);
        assert_eq!(report.workload.inconclusive, 0);
        assert_eq!(store.stats().writes_applied, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_timeout_when_never_elected() {
        let store = store_with(SimulatedFaults {
            never_elect: true,
            ..SimulatedFaults::none()
        });
        let started = Instant::now();
        let report = probe_for(&store, ReplicationConfig::default()).failover().await;

        assert!(started.elapsed() < Duration::from_secs(26));
        assert!(report.step_down_accepted);
        assert!(report.new_primary.is_none());
        assert_eq!(report.result.outcome, Outcome::Failed);
        assert_eq!(report.result.violations.len(), 1);
        assert_eq!(
            report.result.violations[0].kind,
            ViolationKind::FailoverTimeout
        );
        let old_primary = report.old_primary.clone().unwrap();
        assert_eq!(report.result.violations[0].keys, vec![old_primary]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_preferences_all_errors_inconclusive() {
        let store = store_with(SimulatedFaults {
            read_failure_probability: 1.0,
            ..SimulatedFaults::none()
        });
        let config = ReplicationConfig::default().with_read_samples(4);
        let report = probe_for(&store, config).read_preferences().await;

        assert!(report.result.outcome.is_inconclusive());
        assert_eq!(report.samples.len(), 3);
        for sample in &report.samples {
            assert_eq!(sample.errors, 4);
            assert!(sample.latency.is_none());
        }
        assert!(report.result.latency.is_none());
    }
}
