//! Write propagation, read routing and failover experiments.

use super::poll::{poll_until, PollPolicy};
use super::with_namespace;
use super::workload::BackgroundWorkload;
use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::metrics::{millis, StatsAccumulator, StatsSnapshot};
use crate::store::{status_or_unknown, timed, StoreHandle};
use crate::types::{
    ExperimentResult, OperationCounts, Outcome, ProbeRecord, ReadConsistency, ReadRouting,
    ViolationKind, ViolationReport, WriteDurability,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

const SUITE: &str = "replication";

#[derive(Debug, Clone, Serialize)]
pub struct PropagationReport {
    pub result: ExperimentResult,
    /// Records the batch tried to write.
    pub total: u64,
    /// Writes acknowledged by the primary.
    pub written: u64,
    /// Records visible through secondary routing.
    pub propagated: u64,
    pub pct: f64,
    pub insert_ms: f64,
}

/// Latency and hit rate for one routing mode.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingSample {
    pub routing: ReadRouting,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub latency: Option<StatsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadPreferenceReport {
    pub result: ExperimentResult,
    pub samples: Vec<RoutingSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverReport {
    pub result: ExperimentResult,
    pub old_primary: Option<String>,
    pub new_primary: Option<String>,
    pub step_down_accepted: bool,
    /// Time from stepdown to a different primary being visible.
    pub elapsed_ms: Option<f64>,
    /// Background writes during the transition window.
    pub workload: OperationCounts,
}

/// Everything the replication suite observed.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationReport {
    pub propagation: PropagationReport,
    pub read_preference: ReadPreferenceReport,
    pub failover: FailoverReport,
}

impl ReplicationReport {
    pub fn experiments(&self) -> Vec<&ExperimentResult> {
        vec![
            &self.propagation.result,
            &self.read_preference.result,
            &self.failover.result,
        ]
    }
}

/// Share of `total` covered by `propagated`, clamped to `[0, 100]`.
pub(crate) fn propagation_pct(propagated: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    propagated.min(total) as f64 / total as f64 * 100.0
}

/// Runs propagation, read routing and failover experiments in order.
pub struct ReplicationProbe {
    store: Arc<dyn StoreHandle>,
    config: ReplicationConfig,
}

impl ReplicationProbe {
    pub fn new(store: Arc<dyn StoreHandle>, config: ReplicationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<ReplicationReport> {
        info!(suite = SUITE, "start");
        let this = self;
        let report = with_namespace(&*self.store, &self.config.namespace, move || async move {
            let propagation = this.write_propagation().await;
            let read_preference = this.read_preferences().await;
            let failover = this.failover().await;
            ReplicationReport {
                propagation,
                read_preference,
                failover,
            }
        })
        .await?;
        info!(suite = SUITE, "done");
        Ok(report)
    }

    /// Sequentially insert N records, then check each through secondary
    /// routing.
    pub async fn write_propagation(&self) -> PropagationReport {
        info!(suite = SUITE, phase = "propagation", "begin");
        let ns = self.config.namespace.as_str();
        let total = u64::from(self.config.propagation_count);
        let durability = self.config.propagation_durability;
        let mut counts = OperationCounts::default();

        let start = Instant::now();
        let mut written = Vec::with_capacity(total as usize);
        for i in 0..total {
            let record = ProbeRecord::new(format!("primary_write_{}", i), "replication", i);
            counts.attempted += 1;
            match self.store.write(ns, &record, durability).await {
                Ok(()) => {
                    counts.succeeded += 1;
                    written.push(record.id);
                }
                Err(e) => {
                    counts.failed += 1;
                    warn!(suite = SUITE, phase = "propagation", key = %record.id, error = %e, "write failed");
                }
            }
        }
        let insert_ms = millis(start.elapsed());
        info!(
            suite = SUITE,
            phase = "propagation",
            written = written.len(),
            elapsed_ms = insert_ms,
            "records inserted"
        );

        let mut propagated = 0u64;
        for key in &written {
            counts.attempted += 1;
            match self
                .store
                .read(ns, key, ReadRouting::Secondary, ReadConsistency::Default)
                .await
            {
                Ok(Some(_)) => {
                    propagated += 1;
                    counts.succeeded += 1;
                }
                Ok(None) => counts.failed += 1,
                Err(e) => {
                    counts.failed += 1;
                    warn!(suite = SUITE, phase = "propagation", key = %key, error = %e, "secondary read failed");
                }
            }
        }

        let pct = propagation_pct(propagated, total);
        info!(
            suite = SUITE,
            phase = "propagation",
            ok = propagated,
            total,
            pct = %format!("{:.2}", pct),
            "propagation checked"
        );

        let mut result = ExperimentResult::new("propagation");
        result.counts = counts;
        result.outcome = if propagated == total {
            Outcome::Passed
        } else {
            Outcome::Failed
        };

        PropagationReport {
            result,
            total,
            written: written.len() as u64,
            propagated,
            pct,
            insert_ms,
        }
    }

    /// Write one record, then time the same point read under every routing
    /// mode.
    pub async fn read_preferences(&self) -> ReadPreferenceReport {
        info!(suite = SUITE, phase = "read_preference", "begin");
        let ns = self.config.namespace.as_str();
        let record = ProbeRecord::new("read_pref_test", "replication", 999);
        let mut result = ExperimentResult::new("read_preference");

        if let Err(e) = self
            .store
            .write(ns, &record, WriteDurability::acknowledged())
            .await
        {
            warn!(suite = SUITE, phase = "read_preference", error = %e, "seed write failed");
            result.outcome = Outcome::inconclusive(format!("seed write failed: {}", e.kind()));
            return ReadPreferenceReport {
                result,
                samples: Vec::new(),
            };
        }

        let overall = StatsAccumulator::new();
        let mut samples = Vec::with_capacity(ReadRouting::ALL.len());
        for routing in ReadRouting::ALL {
            let latency = StatsAccumulator::new();
            let mut sample = RoutingSample {
                routing,
                hits: 0,
                misses: 0,
                errors: 0,
                latency: None,
            };

            for _ in 0..self.config.read_samples {
                let read = timed(self.store.read(
                    ns,
                    &record.id,
                    routing,
                    ReadConsistency::Default,
                ))
                .await;
                match read.value {
                    Ok(Some(_)) => {
                        sample.hits += 1;
                        latency.record(read.latency);
                    }
                    Ok(None) => sample.misses += 1,
                    Err(e) => {
                        sample.errors += 1;
                        warn!(suite = SUITE, phase = "read_preference", %routing, error = %e, "read failed");
                    }
                }
            }

            overall.merge(&latency);
            sample.latency = latency.snapshot();
            match &sample.latency {
                Some(stats) => info!(
                    suite = SUITE,
                    phase = "read_preference",
                    %routing,
                    hits = sample.hits,
                    misses = sample.misses,
                    errors = sample.errors,
                    mean_ms = stats.mean_ms,
                    p50_ms = stats.p50_ms,
                    p99_ms = stats.p99_ms,
                    "routing sampled"
                ),
                None => info!(
                    suite = SUITE,
                    phase = "read_preference",
                    %routing,
                    misses = sample.misses,
                    errors = sample.errors,
                    "routing never hit"
                ),
            }

            result.counts.add(OperationCounts {
                attempted: u64::from(self.config.read_samples),
                succeeded: sample.hits,
                failed: sample.misses + sample.errors,
                inconclusive: 0,
            });
            samples.push(sample);
        }

        result.latency = overall.snapshot();
        result.outcome = if samples.iter().all(|s| s.hits + s.misses == 0) {
            Outcome::inconclusive("every read failed")
        } else {
            Outcome::Passed
        };

        ReadPreferenceReport { result, samples }
    }

    /// Step down the primary under a write workload and wait for a different
    /// primary to appear.
    pub async fn failover(&self) -> FailoverReport {
        info!(suite = SUITE, phase = "failover", "begin");
        let mut report = FailoverReport {
            result: ExperimentResult::new("failover"),
            old_primary: None,
            new_primary: None,
            step_down_accepted: false,
            elapsed_ms: None,
            workload: OperationCounts::default(),
        };

        let initial = status_or_unknown(&*self.store).await;
        let Some(old_primary) = initial.primary().map(str::to_string) else {
            warn!(suite = SUITE, phase = "failover", "current primary unknown, skipping");
            report.result.outcome = Outcome::inconclusive("leader unknown");
            return report;
        };
        info!(suite = SUITE, phase = "failover", primary = %old_primary, "current primary");
        report.old_primary = Some(old_primary.clone());

        let mut workload = BackgroundWorkload::new("failover_writes");
        let writes = self.config.failover_writes;
        let spacing = self.config.failover_write_spacing;
        let store = self.store.clone();
        let ns = self.config.namespace.clone();
        workload.spawn(u64::from(writes), move |ctx| async move {
            for i in 0..writes {
                if ctx.is_cancelled() {
                    break;
                }
                let record = ProbeRecord::new(
                    format!("failover_write_{}", i),
                    "failover",
                    2000 + u64::from(i),
                );
                ctx.track(store.write(&ns, &record, WriteDurability::acknowledged()))
                    .await;
                if !ctx.pause(spacing).await {
                    break;
                }
            }
        });
        let join_deadline = workload.launched_at() + self.config.workload_join_timeout;

        info!(suite = SUITE, phase = "failover", "stepdown trigger");
        match self.store.step_down(self.config.failover_grace).await {
            Ok(()) => {
                report.step_down_accepted = true;
                info!(suite = SUITE, phase = "failover", "stepdown sent");
            }
            Err(e) => warn!(
                suite = SUITE,
                phase = "failover",
                error = %e,
                "stepdown not applied, assuming leader unchanged"
            ),
        }

        let policy = PollPolicy::every(
            self.config.status_poll_interval,
            self.config.failover_timeout,
        );
        let store = &*self.store;
        let previous = old_primary.as_str();
        let monitor = poll_until(&policy, move |_| async move {
            let status = status_or_unknown(store).await;
            status
                .primary()
                .filter(|p| *p != previous)
                .map(str::to_string)
        })
        .await;

        let outcome = workload.join_until(join_deadline).await;
        report.workload = outcome.counts;
        report.result.counts = outcome.counts;
        report.result.latency = outcome.latency;
        info!(
            suite = SUITE,
            phase = "failover",
            ok = outcome.counts.succeeded,
            fail = outcome.counts.failed,
            inconclusive = outcome.counts.inconclusive,
            "concurrent writes"
        );

        match monitor.value {
            Some(new_primary) => {
                let elapsed_ms = millis(monitor.elapsed);
                info!(
                    suite = SUITE,
                    phase = "failover",
                    primary = %new_primary,
                    elapsed_ms,
                    "new primary elected"
                );
                report.new_primary = Some(new_primary);
                report.elapsed_ms = Some(elapsed_ms);
                report.result.outcome = Outcome::Passed;
            }
            None if !report.step_down_accepted => {
                warn!(suite = SUITE, phase = "failover", "no new primary within timeout");
                report.result.outcome = Outcome::inconclusive("stepdown rejected, leader unchanged");
            }
            None => {
                warn!(suite = SUITE, phase = "failover", "no new primary within timeout");
                report.result.push_violation(ViolationReport::new(
                    ViolationKind::FailoverTimeout,
                    vec![old_primary],
                    monitor.attempts,
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SimulatedFaults, SimulatedStore, SimulatedStoreConfig};
    use std::time::Duration;

    fn probe_with(faults: SimulatedFaults, config: ReplicationConfig) -> ReplicationProbe {
        let store = SimulatedStore::new(SimulatedStoreConfig::default().with_faults(faults));
        ReplicationProbe::new(Arc::new(store), config)
    }

    #[test]
    fn test_propagation_pct() {
        assert_eq!(propagation_pct(50, 50), 100.0);
        assert_eq!(propagation_pct(25, 50), 50.0);
        assert_eq!(propagation_pct(0, 50), 0.0);
        assert_eq!(propagation_pct(70, 50), 100.0);
        assert_eq!(propagation_pct(3, 0), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_complete_without_faults() {
        let probe = probe_with(
            SimulatedFaults::none(),
            ReplicationConfig::default().with_propagation_count(10),
        );
        let report = probe.write_propagation().await;

        assert_eq!(report.total, 10);
        assert_eq!(report.propagated, 10);
        assert_eq!(report.pct, 100.0);
        assert_eq!(report.result.outcome, Outcome::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_preferences_cover_every_routing() {
        let probe = probe_with(
            SimulatedFaults::none(),
            ReplicationConfig::default().with_read_samples(4),
        );
        let report = probe.read_preferences().await;

        assert_eq!(report.samples.len(), 3);
        for sample in &report.samples {
            assert_eq!(sample.hits, 4);
            assert_eq!(sample.latency.as_ref().map(|s| s.count), Some(4));
        }
        assert_eq!(report.result.counts.attempted, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_elects_new_primary() {
        let probe = probe_with(SimulatedFaults::none(), ReplicationConfig::default());
        let report = probe.failover().await;

        assert_eq!(report.old_primary.as_deref(), Some("sim-node-1:27017"));
        assert_eq!(report.new_primary.as_deref(), Some("sim-node-2:27017"));
        assert!(report.elapsed_ms.is_some());
        assert_eq!(report.result.outcome, Outcome::Passed);
        assert_eq!(report.workload.attempted, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_unknown_leader_is_inconclusive() {
        let probe = probe_with(
            SimulatedFaults {
                status_unavailable: true,
                ..SimulatedFaults::none()
            },
            ReplicationConfig::default(),
        );
        let report = probe.failover().await;

        assert!(report.result.outcome.is_inconclusive());
        assert!(!report.step_down_accepted);
        assert_eq!(report.workload.attempted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_stepdown_is_inconclusive() {
        let probe = probe_with(
            SimulatedFaults {
                reject_step_down: true,
                ..SimulatedFaults::none()
            },
            ReplicationConfig::default()
                .with_failover_timeout(Duration::from_secs(3), Duration::from_secs(1)),
        );
        let report = probe.failover().await;

        assert!(!report.step_down_accepted);
        assert!(report.result.outcome.is_inconclusive());
        assert!(!report.result.has_violations());
        assert_eq!(report.workload.failed, 0);
    }
}
