//! Consistency probe scenarios.
//!
//! These tests verify:
//! - eventual propagation delay under a fixed lag follows the linear backoff
//! - causal rounds report no violation when replication preserves order
//! - an effect overtaking its cause is reported on the round it is seen
//! - majority writes racing a stepdown wait for the new primary and are all
//!   read back
//! - the full suite on a default-timed set with light faults is clean
//! - a stepdown window that overruns its budget is inconclusive, not failed

#[cfg(test)]
mod tests {
    use crate::config::ConsistencyConfig;
    use crate::probe::ConsistencyProbe;
    use crate::store::{SimulatedFaults, SimulatedStore, SimulatedStoreConfig};
    use crate::testing::utils::{lagged_store, shared, store_with};
    use crate::types::{Outcome, ViolationKind};
    use std::time::Duration;

    fn probe_for(store: &SimulatedStore) -> ConsistencyProbe {
        ConsistencyProbe::new(shared(store), ConsistencyConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_seen_after_linear_backoff() {
        // attempts land at 0, 40 and 95 ms; the write reaches secondaries at 60 ms
        let store = lagged_store(60);
        let report = probe_for(&store).eventual().await;

        assert!(report.seen);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.result.outcome, Outcome::Passed);
        let propagation = report.propagation_ms.unwrap();
        assert!(propagation > 0.0);
        assert!((propagation - 95.0).abs() < 1.0);
        assert_eq!(report.result.counts.attempted, 3);
        assert_eq!(report.result.counts.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_gives_up_after_attempt_budget() {
        let store = lagged_store(60_000);
        let report = probe_for(&store).eventual().await;

        assert!(!report.seen);
        assert_eq!(report.attempts, 12);
        assert!(report.propagation_ms.is_none());
        assert_eq!(report.result.violations.len(), 1);
        assert_eq!(
            report.result.violations[0].kind,
            ViolationKind::PropagationTimeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_causal_clean_while_lag_within_rounds() {
        // rounds poll every 40 ms, so a 120 ms lag is caught up by round 4
        for lag_ms in [0, 20, 40, 80, 100, 120] {
            let store = lagged_store(lag_ms);
            let report = probe_for(&store).causal_with_keys("c_a_1", "c_b_1").await;

            assert!(!report.result.has_violations(), "lag {} ms", lag_ms);
            assert!(report.both_seen, "lag {} ms", lag_ms);
            assert_eq!(report.result.outcome, Outcome::Passed);
            assert!(report.rounds <= 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_causal_lag_beyond_rounds_is_inconclusive() {
        let store = lagged_store(1_000);
        let report = probe_for(&store).causal_with_keys("c_a_1", "c_b_1").await;

        assert!(!report.both_seen);
        assert!(!report.result.has_violations());
        assert_eq!(report.rounds, 6);
        assert_eq!(report.clean_rounds, 6);
        assert!(report.result.outcome.is_inconclusive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordered_replication_reports_causal_violation() {
        let store = store_with(SimulatedFaults {
            reorder_replication: true,
            ..SimulatedFaults::none().with_replication_lag(Duration::from_millis(100))
        });
        let report = probe_for(&store).causal_with_keys("c_a_1", "c_b_1").await;

        assert_eq!(report.rounds, 1);
        assert_eq!(report.result.outcome, Outcome::Failed);
        let violation = &report.result.violations[0];
        assert_eq!(violation.kind, ViolationKind::CausalOrder);
        assert_eq!(violation.keys, vec!["c_a_1".to_string(), "c_b_1".to_string()]);
        assert_eq!(violation.round, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_writes_survive_stepdown() {
        let store = SimulatedStore::new(
            SimulatedStoreConfig::default()
                .with_election_delay(Duration::from_millis(300))
                .with_faults(
                    SimulatedFaults::none().with_replication_lag(Duration::from_millis(20)),
                ),
        );
        let report = probe_for(&store).strong().await;

        assert_eq!(report.read_back.outcome, Outcome::Passed);
        assert!(report.step_down_accepted);
        assert!(!report.stepdown.has_violations());
        assert_eq!(report.stepdown.outcome, Outcome::Passed);
        assert_eq!(report.verified, 6);
        assert_eq!(report.stepdown.counts.succeeded, 12);
        assert_eq!(report.stepdown.counts.failed, 0);
        assert_eq!(store.stats().step_downs, 1);
        assert_eq!(store.stats().elections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stepdown_window_over_budget_is_inconclusive() {
        let store = lagged_store(0);
        let probe = ConsistencyProbe::new(
            shared(&store),
            ConsistencyConfig::default().with_stepdown_budget(Duration::from_millis(500)),
        );
        let report = probe.strong().await;

        assert!(report.stepdown.outcome.is_inconclusive());
        assert!(!report.stepdown.has_violations());
        assert!(report.stepdown.counts.inconclusive > 0);
        assert_eq!(report.verified, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_election_timing_is_clean() {
        let store = SimulatedStore::new(
            SimulatedStoreConfig::default().with_faults(SimulatedFaults::light()),
        );
        let report = probe_for(&store).run().await.unwrap();

        assert!(report.eventual.seen);
        assert!(report.causal.both_seen);
        assert!(report.strong.step_down_accepted);
        assert_eq!(report.strong.stepdown.outcome, Outcome::Passed);
        assert_eq!(report.strong.stepdown.counts.succeeded, 12);
        assert_eq!(report.strong.stepdown.counts.failed, 0);
        assert_eq!(report.strong.verified, 6);
        assert!(report.experiments().iter().all(|e| !e.has_violations()));
    }
}
