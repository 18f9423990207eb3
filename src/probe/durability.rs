//! Write-concern latency matrix.

use super::with_namespace;
use crate::config::DurabilityConfig;
use crate::error::Result;
use crate::metrics::{millis, StatsAccumulator, WorkloadCounters};
use crate::store::{timed, StoreHandle};
use crate::types::{ExperimentResult, Outcome, ProbeRecord, WriteDurability};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const SUITE: &str = "write-concern";

/// Measurements for one durability level.
#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    pub durability: WriteDurability,
    pub result: ExperimentResult,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurabilityReport {
    pub levels: Vec<LevelReport>,
}

impl DurabilityReport {
    pub fn experiments(&self) -> Vec<&ExperimentResult> {
        self.levels.iter().map(|l| &l.result).collect()
    }
}

/// Times repeated batch inserts at every configured durability level.
pub struct DurabilityBenchmark {
    store: Arc<dyn StoreHandle>,
    config: DurabilityConfig,
}

impl DurabilityBenchmark {
    pub fn new(store: Arc<dyn StoreHandle>, config: DurabilityConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DurabilityConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<DurabilityReport> {
        info!(
            suite = SUITE,
            trials = self.config.trials,
            batch = self.config.batch_size,
            "start"
        );
        let this = self;
        let report = with_namespace(&*self.store, &self.config.namespace, move || async move {
            this.warm_up().await;
            let mut levels = Vec::with_capacity(this.config.matrix.len());
            for (index, durability) in this.config.matrix.iter().enumerate() {
                levels.push(this.measure_level(index, *durability).await);
            }
            DurabilityReport { levels }
        })
        .await?;
        info!(suite = SUITE, "done");
        Ok(report)
    }

    fn batch(&self, prefix: &str, trial: u32) -> Vec<ProbeRecord> {
        (0..self.config.batch_size)
            .map(|j| {
                ProbeRecord::new(
                    format!("{}_{}_{}", prefix, trial, j),
                    "write-concern",
                    j as u64,
                )
            })
            .collect()
    }

    fn pause(&self) -> Duration {
        let (min, max) = (self.config.pause_min, self.config.pause_max);
        if max <= min {
            return min;
        }
        let ms = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(ms)
    }

    async fn clear(&self) {
        if let Err(e) = self.store.clear_namespace(&self.config.namespace).await {
            warn!(suite = SUITE, error = %e, "clear failed");
        }
    }

    /// Unmeasured batches at every level, then discard what they wrote.
    async fn warm_up(&self) {
        if self.config.warmup_rounds == 0 {
            return;
        }
        let ns = self.config.namespace.as_str();
        for (index, durability) in self.config.matrix.iter().enumerate() {
            for round in 0..self.config.warmup_rounds {
                let batch = self.batch(&format!("warm{}", index), round);
                if let Err(e) = self.store.write_batch(ns, &batch, *durability).await {
                    debug!(suite = SUITE, %durability, error = %e, "warm-up batch failed");
                }
            }
        }
        self.clear().await;
        info!(suite = SUITE, rounds = self.config.warmup_rounds, "warm-up complete");
    }

    async fn measure_level(&self, index: usize, durability: WriteDurability) -> LevelReport {
        info!(suite = SUITE, %durability, "level begin");
        let ns = self.config.namespace.as_str();
        let latency = StatsAccumulator::new();
        let counters = WorkloadCounters::new();
        let prefix = format!("wc{}", index);
        let started = Instant::now();

        for trial in 0..self.config.trials {
            let batch = self.batch(&prefix, trial);
            counters.record_attempt();
            let insert = timed(self.store.write_batch(ns, &batch, durability)).await;
            match insert.value {
                Ok(()) => {
                    counters.record_success();
                    latency.record(insert.latency);
                }
                Err(e) => {
                    debug!(suite = SUITE, %durability, trial, error = %e, "trial failed");
                    counters.record_failure(&e);
                }
            }

            if trial + 1 < self.config.trials {
                sleep(self.pause()).await;
            }
        }

        let mut result = ExperimentResult::new(durability.label());
        result.counts = counters.to_counts(u64::from(self.config.trials));
        result.latency = latency.snapshot();

        match &result.latency {
            Some(stats) => {
                info!(
                    suite = SUITE,
                    %durability,
                    ok = result.counts.succeeded,
                    fail = result.counts.failed,
                    mean_ms = stats.mean_ms,
                    min_ms = stats.min_ms,
                    max_ms = stats.max_ms,
                    std_ms = stats.std_dev_ms,
                    p99_ms = stats.p99_ms,
                    elapsed_ms = millis(started.elapsed()),
                    "level measured"
                );
                result.outcome = Outcome::Passed;
            }
            None => {
                warn!(
                    suite = SUITE,
                    %durability,
                    fail = result.counts.failed,
                    "no successful runs"
                );
                result.outcome = Outcome::inconclusive("no successful runs");
            }
        }
        for (kind, count) in counters.errors_by_kind() {
            info!(suite = SUITE, %durability, kind, count, "failed trials");
        }

        self.clear().await;

        LevelReport {
            durability,
            result,
            batch_size: self.config.batch_size,
        }
    }
}
