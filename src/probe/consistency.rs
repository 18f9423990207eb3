//! Strong, eventual and causal consistency experiments.

use super::poll::{poll_until, Backoff, PollPolicy};
use super::workload::BackgroundWorkload;
use super::{key_suffix, with_namespace};
use crate::config::ConsistencyConfig;
use crate::error::Result;
use crate::metrics::{millis, StatsAccumulator, WorkloadCounters};
use crate::store::{timed, StoreHandle};
use crate::types::{
    ConsistencyLevel, ExperimentResult, OperationCounts, Outcome, ProbeRecord, ReadConsistency,
    ReadRouting, ViolationKind, ViolationReport,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const SUITE: &str = "consistency";

/// Strong sub-experiment: majority read-back plus the stepdown race.
#[derive(Debug, Clone, Serialize)]
pub struct StrongReport {
    pub read_back: ExperimentResult,
    pub write_ms: Option<f64>,
    pub read_ms: Option<f64>,
    pub stepdown: ExperimentResult,
    pub step_down_accepted: bool,
    /// Acknowledged stepdown-window writes found again afterwards.
    pub verified: u64,
}

/// Eventual sub-experiment.
#[derive(Debug, Clone, Serialize)]
pub struct EventualReport {
    pub result: ExperimentResult,
    pub seen: bool,
    /// Secondary polls issued.
    pub attempts: u32,
    pub write_ms: Option<f64>,
    /// Time from write completion to the first successful poll.
    pub propagation_ms: Option<f64>,
}

/// Causal sub-experiment.
#[derive(Debug, Clone, Serialize)]
pub struct CausalReport {
    pub result: ExperimentResult,
    pub cause: String,
    pub effect: String,
    /// Poll rounds issued.
    pub rounds: u32,
    /// Rounds where both reads returned without error.
    pub clean_rounds: u64,
    pub both_seen: bool,
}

/// Everything the consistency suite observed.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub strong: StrongReport,
    pub eventual: EventualReport,
    pub causal: CausalReport,
}

impl ConsistencyReport {
    pub fn experiments(&self) -> Vec<&ExperimentResult> {
        vec![
            &self.strong.read_back,
            &self.strong.stepdown,
            &self.eventual.result,
            &self.causal.result,
        ]
    }
}

struct StepdownWindow {
    result: ExperimentResult,
    accepted: bool,
    verified: u64,
}

enum CausalVerdict {
    BothVisible,
    EffectBeforeCause,
}

/// Runs the strong, eventual and causal experiments in order.
pub struct ConsistencyProbe {
    store: Arc<dyn StoreHandle>,
    config: ConsistencyConfig,
}

impl ConsistencyProbe {
    pub fn new(store: Arc<dyn StoreHandle>, config: ConsistencyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ConsistencyConfig {
        &self.config
    }

    /// Run all three experiments inside the suite's scratch namespace.
    pub async fn run(&self) -> Result<ConsistencyReport> {
        info!(suite = SUITE, "start");
        let this = self;
        let report = with_namespace(&*self.store, &self.config.namespace, move || async move {
            let strong = this.strong().await;
            let eventual = this.eventual().await;
            let causal = this.causal().await;
            ConsistencyReport {
                strong,
                eventual,
                causal,
            }
        })
        .await?;
        info!(suite = SUITE, "done");
        Ok(report)
    }

    /// Majority write followed by a majority read from a secondary, then the
    /// stepdown race.
    pub async fn strong(&self) -> StrongReport {
        info!(suite = SUITE, phase = "strong", "begin");
        let level = ConsistencyLevel::strong();
        let ns = self.config.namespace.as_str();
        let key = format!("strong_{}", key_suffix());
        let record = ProbeRecord::new(&key, "strong", 1);

        let mut read_back = ExperimentResult::new("strong");

        let write = timed(self.store.write(ns, &record, level.durability)).await;
        let write_ms = Some(millis(write.latency));
        read_back.counts.attempted += 1;
        if let Err(e) = write.value {
            warn!(suite = SUITE, phase = "strong", error = %e, "majority write failed");
            read_back.counts.failed += 1;
            read_back.outcome = Outcome::inconclusive(format!("write failed: {}", e.kind()));
            let mut stepdown = ExperimentResult::new("strong_stepdown");
            stepdown.outcome = Outcome::inconclusive("strong write failed");
            return StrongReport {
                read_back,
                write_ms,
                read_ms: None,
                stepdown,
                step_down_accepted: false,
                verified: 0,
            };
        }
        read_back.counts.succeeded += 1;

        let read = timed(self.store.read(ns, &key, level.routing, level.consistency)).await;
        let read_ms = Some(millis(read.latency));
        read_back.counts.attempted += 1;
        let latency = StatsAccumulator::new();
        match read.value {
            Ok(Some(_)) => {
                read_back.counts.succeeded += 1;
                latency.record(read.latency);
                read_back.outcome = Outcome::Passed;
                info!(
                    suite = SUITE,
                    phase = "strong",
                    write_ms = millis(write.latency),
                    read_ms = millis(read.latency),
                    "majority write visible on secondary"
                );
            }
            Ok(None) => {
                read_back.counts.failed += 1;
                read_back.outcome = Outcome::Failed;
                warn!(suite = SUITE, phase = "strong", "miss on secondary (majority read)");
            }
            Err(e) => {
                read_back.counts.failed += 1;
                read_back.outcome = Outcome::inconclusive(format!("read failed: {}", e.kind()));
                warn!(suite = SUITE, phase = "strong", error = %e, "majority read failed");
            }
        }
        read_back.latency = latency.snapshot();

        let window = self.strong_during_stepdown(&key).await;
        StrongReport {
            read_back,
            write_ms,
            read_ms,
            stepdown: window.result,
            step_down_accepted: window.accepted,
            verified: window.verified,
        }
    }

    /// Majority writes and reads racing a forced stepdown, then read-back of
    /// every acknowledged write.
    async fn strong_during_stepdown(&self, probe_key: &str) -> StepdownWindow {
        info!(suite = SUITE, phase = "strong_stepdown", "begin");
        let level = ConsistencyLevel::strong();
        let ops = self.config.stepdown_ops;
        let spacing = self.config.stepdown_op_spacing;
        let mut workload = BackgroundWorkload::new("strong_stepdown");

        let store = self.store.clone();
        let ns = self.config.namespace.clone();
        workload.spawn(u64::from(ops), move |ctx| async move {
            for i in 0..ops {
                if ctx.is_cancelled() {
                    break;
                }
                let record = ProbeRecord::new(format!("maj_w_{}", i), "maj", 1000 + u64::from(i));
                if ctx
                    .track(store.write(&ns, &record, level.durability))
                    .await
                    .is_some()
                {
                    ctx.acknowledge(record.id);
                }
                if !ctx.pause(spacing).await {
                    break;
                }
            }
        });

        let store = self.store.clone();
        let ns = self.config.namespace.clone();
        let key = probe_key.to_string();
        workload.spawn(u64::from(ops), move |ctx| async move {
            for _ in 0..ops {
                if ctx.is_cancelled() {
                    break;
                }
                ctx.track_read(store.read(&ns, &key, ReadRouting::Primary, ReadConsistency::Majority))
                    .await;
                if !ctx.pause(spacing).await {
                    break;
                }
            }
        });

        let mut accepted = false;
        match self.store.step_down(self.config.stepdown_grace).await {
            Ok(()) => {
                accepted = true;
                info!(suite = SUITE, phase = "strong_stepdown", "stepdown invoked");
            }
            Err(e) => {
                warn!(
                    suite = SUITE,
                    phase = "strong_stepdown",
                    error = %e,
                    "stepdown not applied, assuming leader unchanged"
                );
            }
        }

        let outcome = workload.join_within(self.config.stepdown_budget).await;
        let mut result = ExperimentResult::new("strong_stepdown");
        result.counts = outcome.counts;
        result.latency = outcome.latency;
        for (kind, count) in &outcome.errors {
            info!(suite = SUITE, phase = "strong_stepdown", kind, count, "rejected operations");
        }

        result.outcome = if outcome.timed_out {
            Outcome::inconclusive("stepdown window exceeded budget")
        } else {
            Outcome::Passed
        };

        let mut verified = 0u64;
        let mut unverified = 0u64;
        for key in &outcome.acknowledged {
            match self.verify_acknowledged(key).await {
                Some(true) => verified += 1,
                Some(false) => {
                    warn!(suite = SUITE, phase = "strong_stepdown", key = %key, "acknowledged majority write lost");
                    result.push_violation(ViolationReport::new(
                        ViolationKind::AcknowledgedWriteLost,
                        vec![key.clone()],
                        self.config.verify_attempts,
                    ));
                }
                None => unverified += 1,
            }
        }
        if unverified > 0 && !result.has_violations() {
            result.outcome = Outcome::inconclusive(format!(
                "{} acknowledged writes could not be read back",
                unverified
            ));
        }

        info!(
            suite = SUITE,
            phase = "strong_stepdown",
            acknowledged = outcome.acknowledged.len(),
            verified,
            outcome = %result.outcome,
            "stepdown window closed"
        );
        StepdownWindow {
            result,
            accepted,
            verified,
        }
    }

    /// `Some(true)` if `key` is readable, `Some(false)` if reads kept
    /// succeeding without finding it, `None` if every read failed.
    async fn verify_acknowledged(&self, key: &str) -> Option<bool> {
        let policy = PollPolicy::new(
            self.config.verify_attempts,
            Backoff::fixed(self.config.verify_interval),
        );
        let absent = AtomicU64::new(0);
        let store = &*self.store;
        let ns = self.config.namespace.as_str();
        let absent_reads = &absent;

        let outcome = poll_until(&policy, move |_| async move {
            match store
                .read(ns, key, ReadRouting::PrimaryPreferred, ReadConsistency::Default)
                .await
            {
                Ok(Some(_)) => Some(()),
                Ok(None) => {
                    absent_reads.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(_) => None,
            }
        })
        .await;

        if outcome.found() {
            Some(true)
        } else if absent.load(Ordering::Relaxed) > 0 {
            Some(false)
        } else {
            None
        }
    }

    /// Primary-acknowledged write polled on a secondary with linear backoff.
    pub async fn eventual(&self) -> EventualReport {
        info!(suite = SUITE, phase = "eventual", "begin");
        let level = ConsistencyLevel::eventual();
        let ns = self.config.namespace.as_str();
        let key = format!("eventual_{}", key_suffix());
        let record = ProbeRecord::new(&key, "eventual", 2);

        let mut result = ExperimentResult::new("eventual");
        let write = timed(self.store.write(ns, &record, level.durability)).await;
        if let Err(e) = write.value {
            warn!(suite = SUITE, phase = "eventual", error = %e, "write failed");
            result.counts = OperationCounts {
                attempted: 1,
                failed: 1,
                ..Default::default()
            };
            result.outcome = Outcome::inconclusive(format!("write failed: {}", e.kind()));
            return EventualReport {
                result,
                seen: false,
                attempts: 0,
                write_ms: Some(millis(write.latency)),
                propagation_ms: None,
            };
        }

        let counters = WorkloadCounters::new();
        let policy = PollPolicy::new(
            self.config.eventual_max_attempts,
            self.config.eventual_backoff,
        );
        let store = &*self.store;
        let key_ref = key.as_str();
        let tally = &counters;
        let outcome = poll_until(&policy, move |_| async move {
            tally.record_attempt();
            match store
                .read(ns, key_ref, level.routing, level.consistency)
                .await
            {
                Ok(Some(_)) => {
                    tally.record_success();
                    Some(())
                }
                Ok(None) => {
                    tally.record_miss();
                    None
                }
                Err(e) => {
                    tally.record_failure(&e);
                    None
                }
            }
        })
        .await;

        result.counts = counters.to_counts(counters.attempted());
        let seen = outcome.found();
        let propagation_ms = seen.then(|| millis(outcome.elapsed));

        if seen {
            let latency = StatsAccumulator::new();
            latency.record(outcome.elapsed);
            result.latency = latency.snapshot();
            result.outcome = Outcome::Passed;
            info!(
                suite = SUITE,
                phase = "eventual",
                propagation_ms = millis(outcome.elapsed),
                attempt = outcome.attempts,
                write_ms = millis(write.latency),
                "propagated to secondary"
            );
        } else {
            warn!(
                suite = SUITE,
                phase = "eventual",
                attempts = outcome.attempts,
                "not visible on secondary within attempt budget"
            );
            result.push_violation(ViolationReport::new(
                ViolationKind::PropagationTimeout,
                vec![key],
                outcome.attempts,
            ));
        }

        EventualReport {
            result,
            seen,
            attempts: outcome.attempts,
            write_ms: Some(millis(write.latency)),
            propagation_ms,
        }
    }

    /// Causal experiment with freshly generated keys.
    pub async fn causal(&self) -> CausalReport {
        let suffix = key_suffix();
        self.causal_with_keys(&format!("c_a_{}", suffix), &format!("c_b_{}", suffix))
            .await
    }

    /// Write `cause` then `effect` (referencing it) in one causal session, and
    /// poll a secondary outside the session for an effect-before-cause
    /// observation.
    pub async fn causal_with_keys(&self, cause: &str, effect: &str) -> CausalReport {
        info!(suite = SUITE, phase = "causal", "begin");
        let level = ConsistencyLevel::causal();
        let ns = self.config.namespace.as_str();

        let mut report = CausalReport {
            result: ExperimentResult::new("causal"),
            cause: cause.to_string(),
            effect: effect.to_string(),
            rounds: 0,
            clean_rounds: 0,
            both_seen: false,
        };

        let mut session = match self.store.causal_session(ns).await {
            Ok(session) => session,
            Err(e) => {
                info!(suite = SUITE, phase = "causal", error = %e, "causal session unavailable, skipped");
                report.result.outcome = Outcome::inconclusive(format!("no causal session: {}", e));
                return report;
            }
        };

        let first = ProbeRecord::new(cause, "cause", 100);
        let second = ProbeRecord::new(effect, "effect", 101).with_dependency(cause);
        for record in [&first, &second] {
            if let Err(e) = session.write(record, level.durability).await {
                warn!(suite = SUITE, phase = "causal", key = %record.id, error = %e, "session write failed");
                report.result.outcome = Outcome::inconclusive(format!("session write failed: {}", e.kind()));
                return report;
            }
        }
        drop(session);

        let counters = WorkloadCounters::new();
        let clean = AtomicU64::new(0);
        let policy = PollPolicy::new(
            self.config.causal_rounds,
            Backoff::fixed(self.config.causal_round_interval),
        );
        let store = &*self.store;
        let tally = &counters;
        let clean_rounds = &clean;

        let outcome = poll_until(&policy, move |_| async move {
            let a = store.read(ns, cause, level.routing, level.consistency).await;
            let b = store.read(ns, effect, level.routing, level.consistency).await;
            for r in [&a, &b] {
                tally.record_attempt();
                match r {
                    Ok(Some(_)) => tally.record_success(),
                    Ok(None) => tally.record_miss(),
                    Err(e) => tally.record_failure(e),
                }
            }
            let (Ok(a), Ok(b)) = (a, b) else {
                return None;
            };
            clean_rounds.fetch_add(1, Ordering::Relaxed);
            match (a.is_some(), b.is_some()) {
                (true, true) => Some(CausalVerdict::BothVisible),
                (false, true) => Some(CausalVerdict::EffectBeforeCause),
                _ => None,
            }
        })
        .await;

        report.rounds = outcome.attempts;
        report.clean_rounds = clean.load(Ordering::Relaxed);
        report.result.counts = counters.to_counts(counters.attempted());

        match outcome.value {
            Some(CausalVerdict::BothVisible) => {
                report.both_seen = true;
                report.result.outcome = Outcome::Passed;
                info!(suite = SUITE, phase = "causal", round = outcome.attempts, "causal ok");
            }
            Some(CausalVerdict::EffectBeforeCause) => {
                warn!(suite = SUITE, phase = "causal", round = outcome.attempts, "causal violation");
                report.result.push_violation(ViolationReport::new(
                    ViolationKind::CausalOrder,
                    vec![cause.to_string(), effect.to_string()],
                    outcome.attempts,
                ));
            }
            None => {
                info!(
                    suite = SUITE,
                    phase = "causal",
                    rounds = outcome.attempts,
                    "records not both visible, no violation observed"
                );
                report.result.outcome = Outcome::inconclusive(format!(
                    "records not both visible within {} rounds",
                    outcome.attempts
                ));
            }
        }
        report
    }
}
