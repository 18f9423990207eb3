//! Background workloads racing a foreground action.
//!
//! A [`BackgroundWorkload`] owns a set of spawned tasks, a cancellation token
//! and the counters those tasks report into. Joining is always bounded: when
//! the deadline passes the token is cancelled, the tasks are abandoned (not
//! aborted) and whatever they had not finished is counted as inconclusive.

use crate::error::StoreError;
use crate::metrics::{StatsAccumulator, StatsSnapshot, WorkloadCounters};
use crate::store::timed;
use crate::types::OperationCounts;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle passed to every task of a workload.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    token: CancellationToken,
    counters: Arc<WorkloadCounters>,
    latencies: Arc<StatsAccumulator>,
    acknowledged: Arc<Mutex<Vec<String>>>,
}

impl WorkloadContext {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep for `delay`, returning `false` if the workload was cancelled
    /// first.
    pub async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    /// Run one store operation, counting and timing it.
    pub async fn track<T, F>(&self, op: F) -> Option<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.counters.record_attempt();
        let result = timed(op).await;
        match result.value {
            Ok(value) => {
                self.counters.record_success();
                self.latencies.record(result.latency);
                Some(value)
            }
            Err(e) => {
                debug!(error = %e, "workload operation failed");
                self.counters.record_failure(&e);
                None
            }
        }
    }

    /// Like [`track`](Self::track) for point reads; an empty read is a miss.
    pub async fn track_read<T, F>(&self, op: F) -> Option<T>
    where
        F: Future<Output = Result<Option<T>, StoreError>>,
    {
        self.counters.record_attempt();
        let result = timed(op).await;
        match result.value {
            Ok(Some(value)) => {
                self.counters.record_success();
                self.latencies.record(result.latency);
                Some(value)
            }
            Ok(None) => {
                self.counters.record_miss();
                None
            }
            Err(e) => {
                debug!(error = %e, "workload read failed");
                self.counters.record_failure(&e);
                None
            }
        }
    }

    /// Remember a key whose write the store acknowledged.
    pub fn acknowledge(&self, key: impl Into<String>) {
        self.acknowledged.lock().push(key.into());
    }
}

/// What a workload achieved by the time it was joined.
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    pub counts: OperationCounts,
    /// Latency over successful operations.
    pub latency: Option<StatsSnapshot>,
    /// Failure counts grouped by error kind.
    pub errors: Vec<(&'static str, u64)>,
    /// Keys acknowledged before the join.
    pub acknowledged: Vec<String>,
    /// The join deadline passed before every task finished.
    pub timed_out: bool,
}

/// A group of spawned tasks sharing counters and a cancellation token.
#[derive(Debug)]
pub struct BackgroundWorkload {
    name: &'static str,
    context: WorkloadContext,
    handles: Vec<JoinHandle<()>>,
    planned: u64,
    launched_at: Instant,
}

impl BackgroundWorkload {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            context: WorkloadContext {
                token: CancellationToken::new(),
                counters: Arc::new(WorkloadCounters::new()),
                latencies: Arc::new(StatsAccumulator::new()),
                acknowledged: Arc::new(Mutex::new(Vec::new())),
            },
            handles: Vec::new(),
            planned: 0,
            launched_at: Instant::now(),
        }
    }

    /// Spawn a task expected to issue `planned` operations.
    pub fn spawn<F, Fut>(&mut self, planned: u64, task: F)
    where
        F: FnOnce(WorkloadContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.handles.is_empty() {
            self.launched_at = Instant::now();
        }
        self.planned += planned;
        self.handles.push(tokio::spawn(task(self.context.clone())));
    }

    pub fn counters(&self) -> &Arc<WorkloadCounters> {
        &self.context.counters
    }

    /// When the first task was spawned.
    pub fn launched_at(&self) -> Instant {
        self.launched_at
    }

    /// Join every task, giving up `budget` after launch.
    pub async fn join_within(self, budget: Duration) -> WorkloadOutcome {
        let deadline = self.launched_at + budget;
        self.join_until(deadline).await
    }

    /// Join every task, giving up at `deadline`.
    pub async fn join_until(mut self, deadline: Instant) -> WorkloadOutcome {
        let handles = &mut self.handles;
        let joined = timeout_at(deadline, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    warn!(error = %e, "workload task ended abnormally");
                }
            }
        })
        .await;

        let timed_out = joined.is_err();
        if timed_out {
            self.context.token.cancel();
            info!(
                workload = self.name,
                abandoned = self.handles.iter().filter(|h| !h.is_finished()).count(),
                "workload join timed out, abandoning unfinished tasks"
            );
        }

        let counters = &self.context.counters;
        let outcome = WorkloadOutcome {
            counts: counters.to_counts(self.planned),
            latency: self.context.latencies.snapshot(),
            errors: counters.errors_by_kind(),
            acknowledged: self.context.acknowledged.lock().clone(),
            timed_out,
        };

        info!(
            workload = self.name,
            ok = outcome.counts.succeeded,
            fail = outcome.counts.failed,
            inconclusive = outcome.counts.inconclusive,
            "workload joined"
        );
        outcome
    }
}
