//! Core types used throughout the probe engine.

use crate::metrics::StatsSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A minimal, insert-only record written by the probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// Caller-assigned unique key.
    pub id: String,
    /// Tag naming the experiment that wrote the record.
    pub owner: String,
    /// Position of the record within its workload.
    pub sequence: u64,
    /// Wall-clock creation time, milliseconds since the epoch.
    pub created_at_ms: i64,
    /// Key of a record this one causally depends on.
    pub depends_on: Option<String>,
}

impl ProbeRecord {
    /// Create a record stamped with the current wall-clock time.
    pub fn new(id: impl Into<String>, owner: impl Into<String>, sequence: u64) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        Self {
            id: id.into(),
            owner: owner.into(),
            sequence,
            created_at_ms,
            depends_on: None,
        }
    }

    /// Mark this record as causally dependent on `key`.
    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.depends_on = Some(key.into());
        self
    }
}

/// How many replicas must acknowledge a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Durability {
    /// Fire and forget; the store reports nothing back.
    Unacknowledged,
    /// The primary alone acknowledges.
    Acknowledged,
    /// A majority of voting members acknowledge.
    Majority,
    /// Every member acknowledges.
    All,
}

/// A durability level plus an optional bound on the replication wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteDurability {
    pub level: Durability,
    pub timeout: Option<Duration>,
}

impl WriteDurability {
    pub const fn unacknowledged() -> Self {
        Self {
            level: Durability::Unacknowledged,
            timeout: None,
        }
    }

    pub const fn acknowledged() -> Self {
        Self {
            level: Durability::Acknowledged,
            timeout: None,
        }
    }

    pub const fn majority() -> Self {
        Self {
            level: Durability::Majority,
            timeout: None,
        }
    }

    pub const fn all() -> Self {
        Self {
            level: Durability::All,
            timeout: None,
        }
    }

    /// Bound the replication wait.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Short label used in log lines, e.g. `w:majority`.
    pub fn label(&self) -> &'static str {
        match self.level {
            Durability::Unacknowledged => "w:0",
            Durability::Acknowledged => "w:1",
            Durability::Majority => "w:majority",
            Durability::All => "w:all",
        }
    }
}

impl fmt::Display for WriteDurability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeout {
            Some(t) => write!(f, "{}(wtimeout={}ms)", self.label(), t.as_millis()),
            None => write!(f, "{}", self.label()),
        }
    }
}

/// Which replica role services a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadRouting {
    Primary,
    PrimaryPreferred,
    Secondary,
}

impl ReadRouting {
    /// Every routing mode, in comparison order.
    pub const ALL: [ReadRouting; 3] = [
        ReadRouting::Primary,
        ReadRouting::Secondary,
        ReadRouting::PrimaryPreferred,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReadRouting::Primary => "primary",
            ReadRouting::PrimaryPreferred => "primaryPreferred",
            ReadRouting::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ReadRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Visibility guarantee applied to a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadConsistency {
    /// Whatever the serving member has applied.
    Default,
    /// Only majority-committed data.
    Majority,
}

/// A named pairing of durability, routing and read consistency.
///
/// Only the documented combinations are exercised by the probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyLevel {
    pub durability: WriteDurability,
    pub routing: ReadRouting,
    pub consistency: ReadConsistency,
}

impl ConsistencyLevel {
    /// Majority write, majority read from a secondary.
    pub const fn strong() -> Self {
        Self {
            durability: WriteDurability::majority(),
            routing: ReadRouting::Secondary,
            consistency: ReadConsistency::Majority,
        }
    }

    /// Primary-acknowledged write, default read from a secondary.
    pub const fn eventual() -> Self {
        Self {
            durability: WriteDurability::acknowledged(),
            routing: ReadRouting::Secondary,
            consistency: ReadConsistency::Default,
        }
    }

    /// Writes inside a causal session; verification reads from a secondary
    /// outside the session.
    pub const fn causal() -> Self {
        Self {
            durability: WriteDurability::acknowledged(),
            routing: ReadRouting::Secondary,
            consistency: ReadConsistency::Default,
        }
    }
}

/// Role of a replica set member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Primary,
    Secondary,
    Unknown,
}

impl MemberRole {
    /// Map a numeric replica state (1 = primary, 2 = secondary).
    pub fn from_state(state: i64) -> Self {
        match state {
            1 => MemberRole::Primary,
            2 => MemberRole::Secondary,
            _ => MemberRole::Unknown,
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Primary => write!(f, "PRIMARY"),
            MemberRole::Secondary => write!(f, "SECONDARY"),
            MemberRole::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One member in a [`ClusterStatus`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub name: String,
    pub role: MemberRole,
    pub healthy: bool,
}

/// Snapshot of member roles, always freshly fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Replica set name, if reported.
    pub set_name: Option<String>,
    pub members: Vec<MemberStatus>,
}

impl ClusterStatus {
    /// A snapshot that knows nothing about the cluster.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Name of the current primary, if exactly one is reported.
    pub fn primary(&self) -> Option<&str> {
        let mut primaries = self
            .members
            .iter()
            .filter(|m| m.role == MemberRole::Primary);
        match (primaries.next(), primaries.next()) {
            (Some(p), None) => Some(p.name.as_str()),
            _ => None,
        }
    }

    /// Number of members reported healthy.
    pub fn healthy_count(&self) -> usize {
        self.members.iter().filter(|m| m.healthy).count()
    }
}

/// Final classification of one sub-experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The property held for every observation.
    Passed,
    /// At least one violation or failed attempt was observed.
    Failed,
    /// Not enough evidence to decide; never conflated with failure.
    Inconclusive { reason: String },
}

impl Outcome {
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Outcome::Inconclusive {
            reason: reason.into(),
        }
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Outcome::Inconclusive { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Inconclusive { reason } => write!(f, "inconclusive ({})", reason),
        }
    }
}

/// Kind of anomaly a probe can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// A dependent record was visible while its cause was not.
    CausalOrder,
    /// A write never became visible on a secondary within the poll budget.
    PropagationTimeout,
    /// No new primary appeared within the failover timeout.
    FailoverTimeout,
    /// A write acknowledged at majority durability could not be read back.
    AcknowledgedWriteLost,
}

/// A detected ordering or visibility anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub kind: ViolationKind,
    /// Keys (or member names) involved.
    pub keys: Vec<String>,
    /// Round or attempt at which the anomaly was observed (1-based).
    pub round: u32,
}

impl ViolationReport {
    pub fn new(kind: ViolationKind, keys: Vec<String>, round: u32) -> Self {
        Self { kind, keys, round }
    }
}

/// Operation tallies for one sub-experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    pub attempted: u64,
    pub succeeded: u64,
    /// Errored attempts, or reads that came back empty.
    pub failed: u64,
    /// Planned operations abandoned at a join timeout.
    pub inconclusive: u64,
}

impl OperationCounts {
    pub fn add(&mut self, other: OperationCounts) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.inconclusive += other.inconclusive;
    }
}

/// Aggregate result of one sub-experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Sub-experiment name, e.g. `eventual`.
    pub name: String,
    pub counts: OperationCounts,
    /// Latency statistics over successful operations, if any.
    pub latency: Option<StatsSnapshot>,
    pub violations: Vec<ViolationReport>,
    pub outcome: Outcome,
}

impl ExperimentResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counts: OperationCounts::default(),
            latency: None,
            violations: Vec::new(),
            outcome: Outcome::inconclusive("not run"),
        }
    }

    /// Record a violation and mark the experiment failed.
    pub fn push_violation(&mut self, violation: ViolationReport) {
        self.violations.push(violation);
        self.outcome = Outcome::Failed;
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, role: MemberRole) -> MemberStatus {
        MemberStatus {
            name: name.to_string(),
            role,
            healthy: true,
        }
    }

    #[test]
    fn test_record_dependency() {
        let a = ProbeRecord::new("c_a_1", "cause", 100);
        let b = ProbeRecord::new("c_b_1", "effect", 101).with_dependency(&a.id);
        assert_eq!(b.depends_on.as_deref(), Some("c_a_1"));
        assert!(a.depends_on.is_none());
        assert!(a.created_at_ms > 0);
    }

    #[test]
    fn test_durability_labels() {
        assert_eq!(WriteDurability::unacknowledged().label(), "w:0");
        assert_eq!(WriteDurability::acknowledged().label(), "w:1");
        let maj = WriteDurability::majority().with_timeout(Duration::from_secs(5));
        assert_eq!(maj.to_string(), "w:majority(wtimeout=5000ms)");
    }

    #[test]
    fn test_named_levels() {
        let strong = ConsistencyLevel::strong();
        assert_eq!(strong.durability.level, Durability::Majority);
        assert_eq!(strong.consistency, ReadConsistency::Majority);

        let eventual = ConsistencyLevel::eventual();
        assert_eq!(eventual.durability.level, Durability::Acknowledged);
        assert_eq!(eventual.routing, ReadRouting::Secondary);
    }

    #[test]
    fn test_cluster_status_primary() {
        let status = ClusterStatus {
            set_name: Some("rs0".to_string()),
            members: vec![
                member("a:27017", MemberRole::Secondary),
                member("b:27017", MemberRole::Primary),
                member("c:27017", MemberRole::Secondary),
            ],
        };
        assert_eq!(status.primary(), Some("b:27017"));
        assert_eq!(status.healthy_count(), 3);

        assert_eq!(ClusterStatus::unknown().primary(), None);
    }

    #[test]
    fn test_two_primaries_is_unknown() {
        let status = ClusterStatus {
            set_name: None,
            members: vec![
                member("a:27017", MemberRole::Primary),
                member("b:27017", MemberRole::Primary),
            ],
        };
        assert_eq!(status.primary(), None);
    }

    #[test]
    fn test_member_role_from_state() {
        assert_eq!(MemberRole::from_state(1), MemberRole::Primary);
        assert_eq!(MemberRole::from_state(2), MemberRole::Secondary);
        assert_eq!(MemberRole::from_state(8), MemberRole::Unknown);
    }

    #[test]
    fn test_violation_marks_failed() {
        let mut result = ExperimentResult::new("causal");
        assert!(result.outcome.is_inconclusive());

        result.push_violation(ViolationReport::new(
            ViolationKind::CausalOrder,
            vec!["a".to_string(), "b".to_string()],
            2,
        ));
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.has_violations());
    }
}
