//! In-process replica set used to exercise the probes without an external
//! store.
//!
//! The model is deliberately small:
//!
//! - One shared insert-only log per namespace. An entry is applied on the
//!   primary at once and reaches the first secondary after the configured
//!   replication lag; further secondaries follow `straggler_delay` apart.
//! - Secondary visibility is monotone in write order (an entry never
//!   overtakes its predecessor) unless `reorder_replication` is set.
//! - A stepdown demotes the primary and opens an election that completes
//!   after `election_delay`. Until then there is no primary; writes and
//!   primary reads wait for one the way driver server selection does, up to
//!   `selection_timeout`.
//!
//! All timing uses the tokio clock so tests can run with paused time.

use super::{CausalSession, StoreHandle};
use crate::error::{AdminError, StoreError};
use crate::metrics::Counter;
use crate::types::{
    ClusterStatus, Durability, MemberRole, MemberStatus, ProbeRecord, ReadConsistency,
    ReadRouting, WriteDurability,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

/// Fault and timing knobs for the simulated replica set.
#[derive(Debug, Clone)]
pub struct SimulatedFaults {
    /// Probability that a write fails (0.0 - 1.0).
    pub write_failure_probability: f64,

    /// Probability that a read fails (0.0 - 1.0).
    pub read_failure_probability: f64,

    /// Minimum simulated network latency per operation.
    pub op_latency_min: Duration,

    /// Maximum simulated network latency per operation.
    pub op_latency_max: Duration,

    /// Time for an entry to reach the first secondary.
    pub replication_lag: Duration,

    /// Random extra lag added per entry, in `[0, jitter]`.
    pub replication_jitter: Duration,

    /// Extra delay for each further secondary.
    pub straggler_delay: Duration,

    /// Records carrying a dependency replicate immediately, ahead of their
    /// causes.
    pub reorder_replication: bool,

    /// Refuse every stepdown request.
    pub reject_step_down: bool,

    /// Elections always hand leadership back to the old primary.
    pub never_elect: bool,

    /// The status command always fails.
    pub status_unavailable: bool,

    /// Namespace creation always fails.
    pub fail_namespace_setup: bool,

    /// Causal sessions are not supported.
    pub sessions_unsupported: bool,
}

impl Default for SimulatedFaults {
    fn default() -> Self {
        Self {
            write_failure_probability: 0.0,
            read_failure_probability: 0.0,
            op_latency_min: Duration::ZERO,
            op_latency_max: Duration::ZERO,
            replication_lag: Duration::ZERO,
            replication_jitter: Duration::ZERO,
            straggler_delay: Duration::ZERO,
            reorder_replication: false,
            reject_step_down: false,
            never_elect: false,
            status_unavailable: false,
            fail_namespace_setup: false,
            sessions_unsupported: false,
        }
    }
}

impl SimulatedFaults {
    /// No faults, no latency, instant replication.
    pub fn none() -> Self {
        Self::default()
    }

    /// LAN-like latency with a little replication lag.
    pub fn light() -> Self {
        Self {
            op_latency_min: Duration::from_micros(200),
            op_latency_max: Duration::from_millis(1),
            replication_lag: Duration::from_millis(5),
            replication_jitter: Duration::from_millis(5),
            straggler_delay: Duration::from_millis(2),
            ..Default::default()
        }
    }

    /// Noticeable lag and occasional transient failures.
    pub fn moderate() -> Self {
        Self {
            write_failure_probability: 0.01,
            read_failure_probability: 0.01,
            op_latency_min: Duration::from_millis(1),
            op_latency_max: Duration::from_millis(5),
            replication_lag: Duration::from_millis(30),
            replication_jitter: Duration::from_millis(20),
            straggler_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Slow replication and frequent transient failures.
    pub fn heavy() -> Self {
        Self {
            write_failure_probability: 0.05,
            read_failure_probability: 0.05,
            op_latency_min: Duration::from_millis(5),
            op_latency_max: Duration::from_millis(20),
            replication_lag: Duration::from_millis(150),
            replication_jitter: Duration::from_millis(100),
            straggler_delay: Duration::from_millis(40),
            ..Default::default()
        }
    }

    /// Set a fixed replication lag with no jitter.
    pub fn with_replication_lag(mut self, lag: Duration) -> Self {
        self.replication_lag = lag;
        self.replication_jitter = Duration::ZERO;
        self
    }
}

/// Configuration for [`SimulatedStore`].
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Number of replica set members.
    pub members: usize,

    /// Replica set name reported in status.
    pub set_name: String,

    /// Time from stepdown to a new primary.
    pub election_delay: Duration,

    /// How long writes and primary reads wait for a primary before failing
    /// with `StoreError::Timeout`.
    pub selection_timeout: Duration,

    /// Fault injection settings.
    pub faults: SimulatedFaults,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        Self {
            members: 3,
            set_name: "rs0".to_string(),
            election_delay: Duration::from_secs(2),
            selection_timeout: Duration::from_secs(30),
            faults: SimulatedFaults::none(),
        }
    }
}

impl SimulatedStoreConfig {
    pub fn with_members(mut self, members: usize) -> Self {
        self.members = members.max(1);
        self
    }

    pub fn with_election_delay(mut self, delay: Duration) -> Self {
        self.election_delay = delay;
        self
    }

    pub fn with_selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout = timeout;
        self
    }

    pub fn with_faults(mut self, faults: SimulatedFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Acknowledgements a write at `level` must collect, primary included.
    fn required_acks(&self, level: Durability) -> usize {
        match level {
            Durability::Unacknowledged | Durability::Acknowledged => 1,
            Durability::Majority => self.members / 2 + 1,
            Durability::All => self.members,
        }
    }

    fn member_name(&self, index: usize) -> String {
        format!("sim-node-{}:27017", index + 1)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: ProbeRecord,
    /// When the first secondary applies the entry.
    replicated_at: Instant,
}

#[derive(Debug, Default)]
struct Namespace {
    entries: HashMap<String, Entry>,
    last_replicated_at: Option<Instant>,
}

#[derive(Debug)]
struct Election {
    completes_at: Instant,
    previous_primary: usize,
}

#[derive(Debug)]
struct ReplicaSet {
    primary: Option<usize>,
    election: Option<Election>,
    namespaces: HashMap<String, Namespace>,
    next_secondary: usize,
}

impl ReplicaSet {
    /// Complete a pending election once its deadline has passed.
    fn resolve_election(&mut self, now: Instant, config: &SimulatedStoreConfig) -> Option<usize> {
        if let Some(election) = &self.election {
            if now >= election.completes_at {
                let winner = if config.faults.never_elect {
                    election.previous_primary
                } else {
                    (election.previous_primary + 1) % config.members
                };
                self.primary = Some(winner);
                self.election = None;
                return Some(winner);
            }
        }
        None
    }

    /// Members currently acting as secondaries, in index order.
    fn secondaries(&self, members: usize) -> Vec<usize> {
        (0..members).filter(|&m| Some(m) != self.primary).collect()
    }
}

/// Counters describing what the simulated store has served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedStats {
    pub writes_applied: u64,
    pub reads_served: u64,
    pub status_queries: u64,
    pub step_downs: u64,
    pub elections: u64,
}

#[derive(Debug)]
struct Inner {
    config: SimulatedStoreConfig,
    state: Mutex<ReplicaSet>,
    writes_applied: Counter,
    reads_served: Counter,
    status_queries: Counter,
    step_downs: Counter,
    elections: Counter,
}

/// An in-memory replica set implementing [`StoreHandle`].
///
/// Cheap to clone; clones share the same replica set.
#[derive(Debug, Clone)]
pub struct SimulatedStore {
    inner: Arc<Inner>,
}

impl SimulatedStore {
    /// Create a replica set whose first member is primary.
    pub fn new(config: SimulatedStoreConfig) -> Self {
        let config = SimulatedStoreConfig {
            members: config.members.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ReplicaSet {
                    primary: Some(0),
                    election: None,
                    namespaces: HashMap::new(),
                    next_secondary: 0,
                }),
                writes_applied: Counter::new(),
                reads_served: Counter::new(),
                status_queries: Counter::new(),
                step_downs: Counter::new(),
                elections: Counter::new(),
            }),
        }
    }

    /// Create with default config.
    pub fn with_defaults() -> Self {
        Self::new(SimulatedStoreConfig::default())
    }

    pub fn config(&self) -> &SimulatedStoreConfig {
        &self.inner.config
    }

    /// Get simulated store statistics.
    pub fn stats(&self) -> SimulatedStats {
        SimulatedStats {
            writes_applied: self.inner.writes_applied.get(),
            reads_served: self.inner.reads_served.get(),
            status_queries: self.inner.status_queries.get(),
            step_downs: self.inner.step_downs.get(),
            elections: self.inner.elections.get(),
        }
    }

    /// Number of records currently held in `namespace` on the primary.
    pub fn record_count(&self, namespace: &str) -> usize {
        self.inner
            .state
            .lock()
            .namespaces
            .get(namespace)
            .map(|ns| ns.entries.len())
            .unwrap_or(0)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.inner.state.lock().namespaces.contains_key(namespace)
    }
}

impl Inner {
    fn faults(&self) -> &SimulatedFaults {
        &self.config.faults
    }

    fn roll(&self, probability: f64) -> bool {
        probability > 0.0 && rand::rng().random_bool(probability.min(1.0))
    }

    fn sample_latency(&self) -> Duration {
        let faults = self.faults();
        if faults.op_latency_max <= faults.op_latency_min {
            return faults.op_latency_min;
        }
        let min = faults.op_latency_min.as_micros() as u64;
        let max = faults.op_latency_max.as_micros() as u64;
        Duration::from_micros(rand::rng().random_range(min..=max))
    }

    async fn network_delay(&self) {
        let delay = self.sample_latency();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn resolve(&self, state: &mut ReplicaSet, now: Instant) {
        if let Some(winner) = state.resolve_election(now, &self.config) {
            self.elections.inc();
            tracing::debug!(
                primary = %self.config.member_name(winner),
                "simulated election completed"
            );
        }
    }

    /// Wait until a primary exists, as driver server selection does.
    ///
    /// Gives up with `Timeout` once `selection_timeout` has passed without
    /// an election completing.
    async fn select_primary(&self) -> Result<(), StoreError> {
        let now = Instant::now();
        let ready_at = {
            let mut state = self.state.lock();
            self.resolve(&mut state, now);
            if state.primary.is_some() {
                return Ok(());
            }
            state.election.as_ref().map(|e| e.completes_at)
        };

        let limit = now + self.config.selection_timeout;
        match ready_at {
            Some(at) if at <= limit => {
                sleep_until(at).await;
                Ok(())
            }
            _ => {
                sleep_until(limit).await;
                Err(StoreError::Timeout)
            }
        }
    }

    fn replication_time(&self, ns: &Namespace, record: &ProbeRecord, now: Instant) -> Instant {
        let faults = self.faults();
        if faults.reorder_replication && record.depends_on.is_some() {
            return now;
        }

        let jitter = if faults.replication_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = faults.replication_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..=max))
        };
        let candidate = now + faults.replication_lag + jitter;

        match ns.last_replicated_at {
            Some(last) if !faults.reorder_replication => candidate.max(last),
            _ => candidate,
        }
    }

    /// When `entry` reaches the secondary at `rank` (0 = fastest).
    fn visible_on_secondary(&self, entry: &Entry, rank: usize) -> Instant {
        entry.replicated_at + self.faults().straggler_delay * rank as u32
    }

    /// When `entry` is acknowledged by `acks` members, primary included.
    fn acknowledged_by(&self, replicated_at: Instant, written_at: Instant, acks: usize) -> Instant {
        if acks <= 1 {
            written_at
        } else {
            replicated_at + self.faults().straggler_delay * (acks - 2) as u32
        }
    }

    fn majority_committed_at(&self, entry: &Entry) -> Instant {
        let acks = self.config.required_acks(Durability::Majority);
        if acks <= 1 {
            // single member: committed on apply
            return entry.replicated_at.min(Instant::now());
        }
        self.acknowledged_by(entry.replicated_at, entry.replicated_at, acks)
    }

    /// Apply a batch on the primary and wait for the requested durability.
    ///
    /// Returns when the last entry of the batch reaches the first secondary.
    async fn insert(
        &self,
        namespace: &str,
        records: &[ProbeRecord],
        durability: WriteDurability,
    ) -> Result<Instant, StoreError> {
        self.network_delay().await;
        self.select_primary().await?;

        let acknowledged = durability.level != Durability::Unacknowledged;
        let written_at = Instant::now();

        let applied = {
            let mut state = self.state.lock();
            self.resolve(&mut state, written_at);

            if state.primary.is_none() {
                Err(StoreError::NotPrimary)
            } else if self.roll(self.faults().write_failure_probability) {
                Err(StoreError::Network("injected write failure".to_string()))
            } else {
                let ns = state.namespaces.entry(namespace.to_string()).or_default();
                match records.iter().find(|r| ns.entries.contains_key(&r.id)) {
                    Some(dup) => Err(StoreError::Internal(format!(
                        "duplicate key {}",
                        dup.id
                    ))),
                    None => {
                        let mut last = written_at;
                        for record in records {
                            let replicated_at = self.replication_time(ns, record, written_at);
                            ns.last_replicated_at = Some(
                                ns.last_replicated_at
                                    .map_or(replicated_at, |l| l.max(replicated_at)),
                            );
                            ns.entries.insert(
                                record.id.clone(),
                                Entry {
                                    record: record.clone(),
                                    replicated_at,
                                },
                            );
                            last = last.max(replicated_at);
                        }
                        self.writes_applied.inc_by(records.len() as u64);
                        Ok(last)
                    }
                }
            }
        };

        let replicated_at = match applied {
            Ok(at) => at,
            // An unacknowledged writer never hears about failures.
            Err(_) if !acknowledged => return Ok(written_at),
            Err(e) => return Err(e),
        };

        let acks = self.config.required_acks(durability.level);
        if acks <= 1 {
            return Ok(replicated_at);
        }

        let ready_at = self.acknowledged_by(replicated_at, written_at, acks);
        let wait = ready_at.saturating_duration_since(Instant::now());
        match durability.timeout {
            Some(limit) if wait > limit => {
                sleep(limit).await;
                Err(StoreError::WriteConcernTimeout { elapsed: limit })
            }
            _ => {
                sleep_until(ready_at).await;
                Ok(replicated_at)
            }
        }
    }

    async fn lookup(
        &self,
        namespace: &str,
        key: &str,
        routing: ReadRouting,
        consistency: ReadConsistency,
    ) -> Result<Option<ProbeRecord>, StoreError> {
        self.network_delay().await;

        if self.roll(self.faults().read_failure_probability) {
            return Err(StoreError::Network("injected read failure".to_string()));
        }
        if routing == ReadRouting::Primary {
            self.select_primary().await?;
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        self.resolve(&mut state, now);

        let use_primary = match routing {
            ReadRouting::Primary if state.primary.is_none() => return Err(StoreError::NotPrimary),
            ReadRouting::Primary => true,
            ReadRouting::PrimaryPreferred => state.primary.is_some(),
            ReadRouting::Secondary => false,
        };

        let rank = if use_primary {
            None
        } else {
            let secondaries = state.secondaries(self.config.members);
            if secondaries.is_empty() {
                // no member matches the read preference
                return Err(StoreError::Timeout);
            }
            let rank = state.next_secondary % secondaries.len();
            state.next_secondary = state.next_secondary.wrapping_add(1);
            Some(rank)
        };

        self.reads_served.inc();

        let Some(entry) = state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.entries.get(key))
        else {
            return Ok(None);
        };

        let visible_at = match (rank, consistency) {
            (None, ReadConsistency::Default) => now,
            (None, ReadConsistency::Majority) => self.majority_committed_at(entry),
            (Some(rank), ReadConsistency::Default) => self.visible_on_secondary(entry, rank),
            (Some(rank), ReadConsistency::Majority) => self
                .visible_on_secondary(entry, rank)
                .max(self.majority_committed_at(entry)),
        };

        Ok((now >= visible_at).then(|| entry.record.clone()))
    }
}

#[async_trait]
impl StoreHandle for SimulatedStore {
    async fn prepare_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        if self.inner.faults().fail_namespace_setup {
            return Err(StoreError::Internal(format!(
                "cannot create namespace {}",
                namespace
            )));
        }
        self.inner.network_delay().await;
        self.inner
            .state
            .lock()
            .namespaces
            .insert(namespace.to_string(), Namespace::default());
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.inner.network_delay().await;
        self.inner.state.lock().namespaces.remove(namespace);
        Ok(())
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.inner.network_delay().await;
        if let Some(ns) = self.inner.state.lock().namespaces.get_mut(namespace) {
            ns.entries.clear();
            ns.last_replicated_at = None;
        }
        Ok(())
    }

    async fn write(
        &self,
        namespace: &str,
        record: &ProbeRecord,
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.inner
            .insert(namespace, std::slice::from_ref(record), durability)
            .await
            .map(|_| ())
    }

    async fn write_batch(
        &self,
        namespace: &str,
        records: &[ProbeRecord],
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.inner
            .insert(namespace, records, durability)
            .await
            .map(|_| ())
    }

    async fn read(
        &self,
        namespace: &str,
        key: &str,
        routing: ReadRouting,
        consistency: ReadConsistency,
    ) -> Result<Option<ProbeRecord>, StoreError> {
        self.inner.lookup(namespace, key, routing, consistency).await
    }

    async fn causal_session(
        &self,
        namespace: &str,
    ) -> Result<Box<dyn CausalSession>, StoreError> {
        if self.inner.faults().sessions_unsupported {
            return Err(StoreError::Unsupported("causal sessions"));
        }
        Ok(Box::new(SimulatedSession {
            inner: self.inner.clone(),
            namespace: namespace.to_string(),
        }))
    }

    async fn cluster_status(&self) -> Result<ClusterStatus, AdminError> {
        if self.inner.faults().status_unavailable {
            return Err(AdminError::Unavailable(
                "replica set status unavailable".to_string(),
            ));
        }
        self.inner.network_delay().await;
        self.inner.status_queries.inc();

        let mut state = self.inner.state.lock();
        self.inner.resolve(&mut state, Instant::now());

        let config = &self.inner.config;
        let members = (0..config.members)
            .map(|i| MemberStatus {
                name: config.member_name(i),
                role: if state.primary == Some(i) {
                    MemberRole::Primary
                } else {
                    MemberRole::Secondary
                },
                healthy: true,
            })
            .collect();

        Ok(ClusterStatus {
            set_name: Some(config.set_name.clone()),
            members,
        })
    }

    async fn step_down(&self, grace: Duration) -> Result<(), AdminError> {
        if self.inner.faults().reject_step_down {
            return Err(AdminError::StepDownRejected(
                "no electable secondaries caught up".to_string(),
            ));
        }
        self.inner.network_delay().await;

        let config = &self.inner.config;
        if config.members < 2 {
            return Err(AdminError::StepDownRejected(
                "no electable secondaries".to_string(),
            ));
        }

        let now = Instant::now();
        let mut state = self.inner.state.lock();
        self.inner.resolve(&mut state, now);

        let Some(previous_primary) = state.primary.take() else {
            return Err(AdminError::StepDownRejected("not primary".to_string()));
        };
        state.election = Some(Election {
            completes_at: now + config.election_delay,
            previous_primary,
        });
        self.inner.step_downs.inc();

        tracing::debug!(
            previous = %config.member_name(previous_primary),
            grace_secs = grace.as_secs(),
            "simulated stepdown"
        );
        Ok(())
    }
}

/// Causal session over the simulated replica set.
///
/// Session writes go through the same insert path as plain writes, so a
/// dependent record never replicates ahead of its cause unless
/// `reorder_replication` is set.
struct SimulatedSession {
    inner: Arc<Inner>,
    namespace: String,
}

#[async_trait]
impl CausalSession for SimulatedSession {
    async fn write(
        &mut self,
        record: &ProbeRecord,
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.inner
            .insert(&self.namespace, std::slice::from_ref(record), durability)
            .await
            .map(|_| ())
    }
}
