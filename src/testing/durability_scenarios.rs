//! Write-concern benchmark scenarios.
//!
//! These tests verify:
//! - a level with no successful trial has no statistics and is inconclusive
//! - `w:0` keeps "succeeding" while every write is dropped
//! - write-concern timeouts are counted as failed trials by kind

#[cfg(test)]
mod tests {
    use crate::config::DurabilityConfig;
    use crate::probe::DurabilityBenchmark;
    use crate::testing::utils::{failing_writes_store, lagged_store, shared};
    use crate::types::{Outcome, WriteDurability};
    use std::time::Duration;

    fn config(matrix: Vec<WriteDurability>) -> DurabilityConfig {
        DurabilityConfig::default()
            .with_trials(3)
            .with_batch_size(5)
            .with_warmup_rounds(1)
            .with_pause(Duration::from_millis(10), Duration::from_millis(20))
            .with_matrix(matrix)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_successful_runs_is_inconclusive() {
        let store = failing_writes_store();
        let bench = DurabilityBenchmark::new(
            shared(&store),
            config(vec![
                WriteDurability::unacknowledged(),
                WriteDurability::acknowledged(),
                WriteDurability::majority(),
            ]),
        );
        let report = bench.run().await.unwrap();
        assert_eq!(report.levels.len(), 3);

        let minimal = &report.levels[0].result;
        assert_eq!(minimal.outcome, Outcome::Passed);
        assert_eq!(minimal.latency.as_ref().unwrap().count, 3);

        for level in &report.levels[1..] {
            assert!(level.result.latency.is_none());
            assert_eq!(
                level.result.outcome,
                Outcome::inconclusive("no successful runs")
            );
            assert_eq!(level.result.counts.attempted, 3);
            assert_eq!(level.result.counts.failed, 3);
            assert!(!level.result.has_violations());
        }
        assert_eq!(store.stats().writes_applied, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_concern_timeout_counted_per_trial() {
        let store = lagged_store(10_000);
        let bench = DurabilityBenchmark::new(
            shared(&store),
            config(vec![
                WriteDurability::acknowledged(),
                WriteDurability::all().with_timeout(Duration::from_millis(500)),
            ]),
        );
        let report = bench.run().await.unwrap();

        let w1 = &report.levels[0].result;
        assert_eq!(w1.outcome, Outcome::Passed);

        let all = &report.levels[1].result;
        assert!(all.outcome.is_inconclusive());
        assert_eq!(all.counts.failed, 3);
        assert_eq!(all.counts.succeeded, 0);
        // the timed-out batches were still applied on the primary
        assert!(store.stats().writes_applied >= 3 * 5);
        assert!(!store.has_namespace("write_concern_perf_test"));
    }
}
