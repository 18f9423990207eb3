//! Suite selection, boot diagnostics and summary output.

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::probe::{
    ConsistencyProbe, ConsistencyReport, DurabilityBenchmark, DurabilityReport, ReplicationProbe,
    ReplicationReport,
};
use crate::store::StoreHandle;
use crate::types::ExperimentResult;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// A probe suite the orchestrator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suite {
    WriteConcern,
    Replication,
    Consistency,
}

impl Suite {
    pub const ALL: [Suite; 3] = [Suite::WriteConcern, Suite::Replication, Suite::Consistency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Suite::WriteConcern => "write-concern",
            Suite::Replication => "replication",
            Suite::Consistency => "consistency",
        }
    }

    /// Resolve a selection value, warning on anything unrecognised.
    pub fn select(value: Option<&str>) -> Option<Suite> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            warn!("no suite selected, nothing to run");
            return None;
        };
        match raw.parse() {
            Ok(suite) => Some(suite),
            Err(e) => {
                warn!(error = %e, "nothing to run");
                None
            }
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Suite {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write-concern" => Ok(Suite::WriteConcern),
            "replication" => Ok(Suite::Replication),
            "consistency" => Ok(Suite::Consistency),
            other => Err(format!(
                "unknown suite '{}', expected write-concern | replication | consistency",
                other
            )),
        }
    }
}

/// Report of one completed suite.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuiteReport {
    WriteConcern(DurabilityReport),
    Replication(ReplicationReport),
    Consistency(ConsistencyReport),
}

impl SuiteReport {
    pub fn suite(&self) -> Suite {
        match self {
            SuiteReport::WriteConcern(_) => Suite::WriteConcern,
            SuiteReport::Replication(_) => Suite::Replication,
            SuiteReport::Consistency(_) => Suite::Consistency,
        }
    }

    /// Every sub-experiment result, in run order.
    pub fn experiments(&self) -> Vec<&ExperimentResult> {
        match self {
            SuiteReport::WriteConcern(r) => r.experiments(),
            SuiteReport::Replication(r) => r.experiments(),
            SuiteReport::Consistency(r) => r.experiments(),
        }
    }

    pub fn violation_count(&self) -> usize {
        self.experiments().iter().map(|e| e.violations.len()).sum()
    }
}

/// Entry point selecting and running probe suites against one store.
pub struct ExperimentOrchestrator {
    store: Arc<dyn StoreHandle>,
    config: ProbeConfig,
}

impl ExperimentOrchestrator {
    /// Validate `config` and bind it to `store`.
    pub fn new(store: Arc<dyn StoreHandle>, config: ProbeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Log cluster status, then resolve `selection` and run that suite.
    ///
    /// An absent or unknown selection runs nothing and returns `Ok(None)`.
    pub async fn run(&self, selection: Option<&str>) -> Result<Option<SuiteReport>> {
        self.log_cluster_status().await;
        let Some(suite) = Suite::select(selection) else {
            return Ok(None);
        };
        self.run_suite(suite).await.map(Some)
    }

    /// Run `suites` one after another, stopping at the first setup failure.
    pub async fn run_all(&self, suites: &[Suite]) -> Result<Vec<SuiteReport>> {
        self.log_cluster_status().await;
        let mut reports = Vec::with_capacity(suites.len());
        for &suite in suites {
            reports.push(self.run_suite(suite).await?);
        }
        Ok(reports)
    }

    /// Run one suite and log its summary.
    pub async fn run_suite(&self, suite: Suite) -> Result<SuiteReport> {
        info!(suite = %suite, "suite selected");
        let store = self.store.clone();
        let report = match suite {
            Suite::WriteConcern => SuiteReport::WriteConcern(
                DurabilityBenchmark::new(store, self.config.durability.clone())
                    .run()
                    .await?,
            ),
            Suite::Replication => SuiteReport::Replication(
                ReplicationProbe::new(store, self.config.replication.clone())
                    .run()
                    .await?,
            ),
            Suite::Consistency => SuiteReport::Consistency(
                ConsistencyProbe::new(store, self.config.consistency.clone())
                    .run()
                    .await?,
            ),
        };
        log_summary(&report);
        Ok(report)
    }

    /// Log the replica set layout; a failure here is only a warning.
    pub async fn log_cluster_status(&self) {
        match self.store.cluster_status().await {
            Ok(status) => {
                info!(
                    set = status.set_name.as_deref().unwrap_or("-"),
                    members = status.members.len(),
                    healthy = status.healthy_count(),
                    "cluster status"
                );
                for member in &status.members {
                    info!(
                        member = %member.name,
                        role = %member.role,
                        healthy = member.healthy,
                        "member"
                    );
                }
            }
            Err(e) => warn!(error = %e, "cluster status unavailable at boot"),
        }
    }
}

/// One summary line per sub-experiment plus a JSON line for the whole suite.
fn log_summary(report: &SuiteReport) {
    let suite = report.suite();
    for exp in report.experiments() {
        let counts = &exp.counts;
        match &exp.latency {
            Some(stats) => info!(
                suite = %suite,
                experiment = %exp.name,
                outcome = %exp.outcome,
                attempted = counts.attempted,
                ok = counts.succeeded,
                fail = counts.failed,
                inconclusive = counts.inconclusive,
                violations = exp.violations.len(),
                mean_ms = stats.mean_ms,
                p99_ms = stats.p99_ms,
                "summary"
            ),
            None => info!(
                suite = %suite,
                experiment = %exp.name,
                outcome = %exp.outcome,
                attempted = counts.attempted,
                ok = counts.succeeded,
                fail = counts.failed,
                inconclusive = counts.inconclusive,
                violations = exp.violations.len(),
                "summary"
            ),
        }
    }

    match serde_json::to_string(report) {
        Ok(json) => info!(suite = %suite, summary_json = %json, "summary"),
        Err(e) => warn!(suite = %suite, error = %e, "summary serialization failed"),
    }
}
