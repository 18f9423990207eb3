//! Configuration types for the probe suites.

use crate::error::{Error, Result};
use crate::probe::Backoff;
use crate::types::WriteDurability;
use std::time::Duration;

/// Main configuration for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ProbeConfig {
    /// Strong / eventual / causal suite.
    pub consistency: ConsistencyConfig,

    /// Propagation / read routing / failover suite.
    pub replication: ReplicationConfig,

    /// Write-concern latency matrix.
    pub durability: DurabilityConfig,
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set consistency suite configuration.
    pub fn with_consistency_config(mut self, consistency: ConsistencyConfig) -> Self {
        self.consistency = consistency;
        self
    }

    /// Set replication suite configuration.
    pub fn with_replication_config(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    /// Set durability benchmark configuration.
    pub fn with_durability_config(mut self, durability: DurabilityConfig) -> Self {
        self.durability = durability;
        self
    }

    /// Reject configurations no suite can run with.
    pub fn validate(&self) -> Result<()> {
        self.consistency.validate()?;
        self.replication.validate()?;
        self.durability.validate()
    }
}

/// Consistency suite configuration.
#[derive(Debug, Clone)]
pub struct ConsistencyConfig {
    /// Scratch namespace owned by the suite for its run.
    pub namespace: String,

    /// Wall-clock budget for the majority workload racing a stepdown.
    pub stepdown_budget: Duration,

    /// Seconds the stepped-down primary stays ineligible.
    pub stepdown_grace: Duration,

    /// Majority writes and majority reads issued during the stepdown window.
    pub stepdown_ops: u32,

    /// Pause between operations of the stepdown workload.
    pub stepdown_op_spacing: Duration,

    /// Read-back attempts per acknowledged write after the stepdown window.
    pub verify_attempts: u32,

    /// Pause between read-back attempts.
    pub verify_interval: Duration,

    /// Secondary polls before a write is declared not propagated.
    pub eventual_max_attempts: u32,

    /// Delay between eventual polls.
    pub eventual_backoff: Backoff,

    /// Secondary poll rounds for the causal check.
    pub causal_rounds: u32,

    /// Pause between causal poll rounds.
    pub causal_round_interval: Duration,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            namespace: "consistency_test".to_string(),
            stepdown_budget: Duration::from_secs(20),
            stepdown_grace: Duration::from_secs(12),
            stepdown_ops: 6,
            stepdown_op_spacing: Duration::from_millis(180),
            verify_attempts: 20,
            verify_interval: Duration::from_millis(500),
            eventual_max_attempts: 12,
            eventual_backoff: Backoff::linear(Duration::from_millis(25), Duration::from_millis(15)),
            causal_rounds: 6,
            causal_round_interval: Duration::from_millis(40),
        }
    }
}

impl ConsistencyConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_stepdown_budget(mut self, budget: Duration) -> Self {
        self.stepdown_budget = budget;
        self
    }

    pub fn with_eventual_attempts(mut self, attempts: u32, backoff: Backoff) -> Self {
        self.eventual_max_attempts = attempts;
        self.eventual_backoff = backoff;
        self
    }

    pub fn with_causal_rounds(mut self, rounds: u32, interval: Duration) -> Self {
        self.causal_rounds = rounds;
        self.causal_round_interval = interval;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("consistency namespace is empty".to_string()));
        }
        if self.eventual_max_attempts == 0 || self.causal_rounds == 0 {
            return Err(Error::Config(
                "eventual attempts and causal rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replication suite configuration.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Scratch namespace owned by the suite for its run.
    pub namespace: String,

    /// Records written before checking secondary visibility.
    pub propagation_count: u32,

    /// Durability used for the propagation batch.
    pub propagation_durability: WriteDurability,

    /// Point reads per routing mode in the read-preference comparison.
    pub read_samples: u32,

    /// Seconds the stepped-down primary stays ineligible.
    pub failover_grace: Duration,

    /// Writes issued by the background workload during failover.
    pub failover_writes: u32,

    /// Pause between background writes.
    pub failover_write_spacing: Duration,

    /// Cluster status poll interval while waiting for a new primary.
    pub status_poll_interval: Duration,

    /// Give up waiting for a new primary after this long.
    pub failover_timeout: Duration,

    /// Bound on the background workload, measured from its launch.
    pub workload_join_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            namespace: "replication_model_test".to_string(),
            propagation_count: 50,
            propagation_durability: WriteDurability::acknowledged(),
            read_samples: 10,
            failover_grace: Duration::from_secs(30),
            failover_writes: 20,
            failover_write_spacing: Duration::from_millis(200),
            status_poll_interval: Duration::from_secs(1),
            failover_timeout: Duration::from_secs(25),
            workload_join_timeout: Duration::from_secs(20),
        }
    }
}

impl ReplicationConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_propagation_count(mut self, count: u32) -> Self {
        self.propagation_count = count;
        self
    }

    pub fn with_propagation_durability(mut self, durability: WriteDurability) -> Self {
        self.propagation_durability = durability;
        self
    }

    pub fn with_read_samples(mut self, samples: u32) -> Self {
        self.read_samples = samples;
        self
    }

    pub fn with_failover_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.failover_timeout = timeout;
        self.status_poll_interval = poll_interval;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("replication namespace is empty".to_string()));
        }
        if self.propagation_count == 0 {
            return Err(Error::Config(
                "propagation count must be at least 1".to_string(),
            ));
        }
        if self.status_poll_interval.is_zero() {
            return Err(Error::Config("status poll interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Durability benchmark configuration.
#[derive(Debug, Clone)]
pub struct DurabilityConfig {
    /// Scratch namespace owned by the benchmark for its run.
    pub namespace: String,

    /// Measured batch inserts per durability level.
    pub trials: u32,

    /// Records per batch.
    pub batch_size: usize,

    /// Unmeasured batches per level before measuring.
    pub warmup_rounds: u32,

    /// Lower bound of the randomized pause between trials.
    pub pause_min: Duration,

    /// Upper bound of the randomized pause between trials.
    pub pause_max: Duration,

    /// Durability levels measured, in order.
    pub matrix: Vec<WriteDurability>,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        let wtimeout = Duration::from_secs(5);
        Self {
            namespace: "write_concern_perf_test".to_string(),
            trials: 500,
            batch_size: 400,
            warmup_rounds: 5,
            pause_min: Duration::from_millis(60),
            pause_max: Duration::from_millis(120),
            matrix: vec![
                WriteDurability::unacknowledged(),
                WriteDurability::acknowledged(),
                WriteDurability::majority().with_timeout(wtimeout),
                WriteDurability::all().with_timeout(wtimeout),
            ],
        }
    }
}

impl DurabilityConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_trials(mut self, trials: u32) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_warmup_rounds(mut self, rounds: u32) -> Self {
        self.warmup_rounds = rounds;
        self
    }

    pub fn with_pause(mut self, min: Duration, max: Duration) -> Self {
        self.pause_min = min;
        self.pause_max = max;
        self
    }

    pub fn with_matrix(mut self, matrix: Vec<WriteDurability>) -> Self {
        self.matrix = matrix;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.trials == 0 || self.batch_size == 0 {
            return Err(Error::Config(
                "trials and batch size must be at least 1".to_string(),
            ));
        }
        if self.pause_min > self.pause_max {
            return Err(Error::Config(format!(
                "pause_min {:?} exceeds pause_max {:?}",
                self.pause_min, self.pause_max
            )));
        }
        if self.matrix.is_empty() {
            return Err(Error::Config("durability matrix is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Durability;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.consistency.eventual_max_attempts, 12);
        assert_eq!(config.consistency.causal_rounds, 6);
        assert_eq!(config.consistency.stepdown_budget, Duration::from_secs(20));
        assert_eq!(config.replication.propagation_count, 50);
        assert_eq!(config.replication.failover_timeout, Duration::from_secs(25));
        assert_eq!(config.durability.trials, 500);
        assert_eq!(config.durability.batch_size, 400);
        assert_eq!(config.durability.matrix.len(), 4);
        assert_eq!(config.durability.matrix[2].level, Durability::Majority);
        assert_eq!(
            config.durability.matrix[2].timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_config_builder() {
        let config = ProbeConfig::new()
            .with_durability_config(
                DurabilityConfig::default()
                    .with_trials(3)
                    .with_batch_size(10)
                    .with_warmup_rounds(0),
            )
            .with_replication_config(ReplicationConfig::default().with_propagation_count(5));

        assert_eq!(config.durability.trials, 3);
        assert_eq!(config.durability.batch_size, 10);
        assert_eq!(config.durability.warmup_rounds, 0);
        assert_eq!(config.replication.propagation_count, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let zero_batch = ProbeConfig::new()
            .with_durability_config(DurabilityConfig::default().with_batch_size(0));
        assert!(matches!(zero_batch.validate(), Err(Error::Config(_))));

        let inverted_pause = ProbeConfig::new().with_durability_config(
            DurabilityConfig::default()
                .with_pause(Duration::from_millis(200), Duration::from_millis(100)),
        );
        assert!(inverted_pause.validate().is_err());

        let no_records = ProbeConfig::new()
            .with_replication_config(ReplicationConfig::default().with_propagation_count(0));
        assert!(no_records.validate().is_err());

        let empty_matrix = ProbeConfig::new()
            .with_durability_config(DurabilityConfig::default().with_matrix(Vec::new()));
        assert!(empty_matrix.validate().is_err());
    }
}
