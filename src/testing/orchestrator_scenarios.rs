//! End-to-end suite runs through the orchestrator.
//!
//! These tests verify:
//! - a scratch namespace that cannot be created aborts the suite
//! - each suite reports every sub-experiment and drops its namespace
//! - a healthy simulated set produces no violations across all suites

#[cfg(test)]
mod tests {
    use crate::config::{DurabilityConfig, ProbeConfig, ReplicationConfig};
    use crate::error::Error;
    use crate::orchestrator::{ExperimentOrchestrator, Suite, SuiteReport};
    use crate::store::{SimulatedFaults, SimulatedStore, SimulatedStoreConfig};
    use crate::testing::utils::{shared, store_with};

    fn quick_config() -> ProbeConfig {
        ProbeConfig::new()
            .with_durability_config(
                DurabilityConfig::default()
                    .with_trials(2)
                    .with_batch_size(10)
                    .with_warmup_rounds(1),
            )
            .with_replication_config(
                ReplicationConfig::default()
                    .with_propagation_count(10)
                    .with_read_samples(3),
            )
    }

    fn healthy_store() -> SimulatedStore {
        SimulatedStore::new(SimulatedStoreConfig::default().with_faults(SimulatedFaults::none()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_namespace_setup_failure_aborts_suite() {
        let store = store_with(SimulatedFaults {
            fail_namespace_setup: true,
            ..SimulatedFaults::none()
        });
        let orchestrator = ExperimentOrchestrator::new(shared(&store), quick_config()).unwrap();

        let result = orchestrator.run(Some("consistency")).await;
        match result {
            Err(Error::NamespaceSetup { namespace, .. }) => {
                assert_eq!(namespace, "consistency_test");
            }
            other => panic!("expected namespace setup error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(store.stats().writes_applied, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consistency_suite_end_to_end() {
        let store = healthy_store();
        let orchestrator = ExperimentOrchestrator::new(shared(&store), quick_config()).unwrap();

        let report = orchestrator.run(Some("consistency")).await.unwrap().unwrap();
        let SuiteReport::Consistency(consistency) = &report else {
            panic!("expected consistency report");
        };
        assert_eq!(report.experiments().len(), 4);
        assert_eq!(report.violation_count(), 0);
        assert!(consistency.strong.step_down_accepted);
        assert!(consistency.eventual.seen);
        assert!(consistency.causal.both_seen);
        assert!(!store.has_namespace("consistency_test"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replication_suite_end_to_end() {
        let store = healthy_store();
        let orchestrator = ExperimentOrchestrator::new(shared(&store), quick_config()).unwrap();

        let report = orchestrator.run(Some(" REPLICATION ")).await.unwrap().unwrap();
        assert_eq!(report.suite(), Suite::Replication);
        assert_eq!(report.experiments().len(), 3);
        assert_eq!(report.violation_count(), 0);

        let SuiteReport::Replication(replication) = &report else {
            panic!("expected replication report");
        };
        assert_eq!(replication.propagation.propagated, 10);
        assert!(replication.failover.new_primary.is_some());
        assert!(!store.has_namespace("replication_model_test"));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["replication"]["failover"]["new_primary"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all_suites_in_order() {
        let store = healthy_store();
        let orchestrator = ExperimentOrchestrator::new(shared(&store), quick_config()).unwrap();

        let reports = orchestrator.run_all(&Suite::ALL).await.unwrap();
        let suites: Vec<Suite> = reports.iter().map(SuiteReport::suite).collect();
        assert_eq!(suites, Suite::ALL.to_vec());
        assert!(reports.iter().all(|r| r.violation_count() == 0));
        assert_eq!(store.stats().step_downs, 2);
    }
}
