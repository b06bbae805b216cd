//! # Cluster Configuration
//!
//! [`TxnConfig`] sizes the cluster, sets the protocol timeouts, the crash
//! model, and the client workload. It is plain serde data so it can be
//! loaded from a JSON file; missing fields take their defaults.
//!
//! ## Cluster Shape
//!
//! | Parameter | Config Field | Default |
//! |-----------|--------------|---------|
//! | Coordinators | `coordinators` | 3 |
//! | Partitions | `partitions` | 5 |
//! | Clients | `clients` | 5 |
//! | Keys per partition | `keys_per_partition` | 10 |
//! | Initial row value | `initial_value` | 100 |
//!
//! ## Timeouts
//!
//! | Timer | Config Field | Default |
//! |-------|--------------|---------|
//! | Coordinator vote wait | `vote_timeout_ms` | 1000 ms |
//! | Partition decision wait | `decision_timeout_ms` | 1000 ms |
//! | Client accept wait | `accept_timeout_ms` | 500 ms |
//!
//! ## Crash Model
//!
//! | Fault | Config Field | Default |
//! |-------|--------------|---------|
//! | Coordinator crash after a multicast | `coordinator_crash_probability` | 0% |
//! | Coordinator downtime | `coordinator_recovery_ms` | 5000 ms |
//! | Partition crash after voting | `partition_crash_probability` | 0% |
//! | Partition downtime | `partition_recovery_ms` | 3000 ms |
//!
//! ## Configuration Examples
//!
//! ```rust
//! use moonpool_txn::TxnConfig;
//!
//! // Small cluster, short transactions, no crashes
//! let config = TxnConfig::fast_local();
//! assert!(config.validate().is_ok());
//!
//! // Partial JSON: everything else keeps its default
//! let config = TxnConfig::from_json(r#"{"partitions": 2}"#).expect("valid config");
//! assert_eq!(config.keys_per_partition, 10);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TxnError};
use crate::sim::rng::sim_random_range;

/// Configuration of a transactional cluster and its workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    // =========================================================================
    // Cluster shape
    // =========================================================================
    /// Number of coordinators.
    pub coordinators: u32,
    /// Number of partitions.
    pub partitions: u32,
    /// Number of workload clients.
    pub clients: u32,
    /// Keys owned by each partition.
    pub keys_per_partition: u32,
    /// Value every row starts with (at version 0).
    pub initial_value: i64,

    // =========================================================================
    // Timeouts
    // =========================================================================
    /// How long a coordinator waits for all votes.
    pub vote_timeout_ms: u64,
    /// How long a YES-voting partition waits before asking for the decision.
    pub decision_timeout_ms: u64,
    /// How long a client waits for `TxnAccept`.
    pub accept_timeout_ms: u64,

    // =========================================================================
    // Crash model
    // =========================================================================
    /// Probability that a coordinator crashes right after a multicast.
    pub coordinator_crash_probability: f64,
    /// Coordinator downtime.
    pub coordinator_recovery_ms: u64,
    /// Probability that a partition crashes right after voting.
    pub partition_crash_probability: f64,
    /// Partition downtime.
    pub partition_recovery_ms: u64,

    // =========================================================================
    // Client workload
    // =========================================================================
    /// Minimum read-two/write-two operations per transaction.
    pub min_txn_ops: u32,
    /// Maximum read-two/write-two operations per transaction.
    pub max_txn_ops: u32,
    /// Probability that an operation writes after reading.
    pub write_probability: f64,
    /// Probability that a transaction asks to commit.
    pub commit_probability: f64,
    /// Transactions each client runs before stopping.
    pub txns_per_client: u32,
    /// Pause between two transactions of the same client.
    pub think_time_ms: u64,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            coordinators: 3,
            partitions: 5,
            clients: 5,
            keys_per_partition: 10,
            initial_value: 100,
            vote_timeout_ms: 1000,
            decision_timeout_ms: 1000,
            accept_timeout_ms: 500,
            coordinator_crash_probability: 0.0,
            coordinator_recovery_ms: 5000,
            partition_crash_probability: 0.0,
            partition_recovery_ms: 3000,
            min_txn_ops: 50,
            max_txn_ops: 60,
            write_probability: 0.5,
            commit_probability: 0.9,
            txns_per_client: 10,
            think_time_ms: 10,
        }
    }
}

impl TxnConfig {
    /// Small cluster with short transactions and no crashes.
    pub fn fast_local() -> Self {
        Self {
            coordinators: 2,
            partitions: 3,
            clients: 3,
            min_txn_ops: 3,
            max_txn_ops: 6,
            txns_per_client: 4,
            ..Self::default()
        }
    }

    /// [`fast_local`](Self::fast_local) with crashes enabled on both roles.
    pub fn chaos() -> Self {
        Self {
            coordinator_crash_probability: 0.05,
            partition_crash_probability: 0.1,
            ..Self::fast_local()
        }
    }

    /// Randomized configuration drawn from the simulation RNG.
    ///
    /// The RNG must already be seeded for the iteration.
    pub fn random_for_seed() -> Self {
        let min_txn_ops = sim_random_range(1..8);
        Self {
            coordinators: sim_random_range(1..4),
            partitions: sim_random_range(1..5),
            clients: sim_random_range(1..5),
            keys_per_partition: sim_random_range(2..12),
            vote_timeout_ms: sim_random_range(200..1500),
            decision_timeout_ms: sim_random_range(200..1500),
            accept_timeout_ms: sim_random_range(100..800),
            coordinator_crash_probability: sim_random_range(0.0..0.15),
            coordinator_recovery_ms: sim_random_range(500..6000),
            partition_crash_probability: sim_random_range(0.0..0.3),
            partition_recovery_ms: sim_random_range(500..4000),
            min_txn_ops,
            max_txn_ops: min_txn_ops + sim_random_range(0..6),
            write_probability: sim_random_range(0.2..0.9),
            commit_probability: sim_random_range(0.5..1.0),
            txns_per_client: sim_random_range(1..5),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Reject configurations that cannot describe a working cluster.
    pub fn validate(&self) -> Result<()> {
        if self.coordinators == 0 {
            return Err(TxnError::InvalidConfig("at least one coordinator is required".into()));
        }
        if self.partitions == 0 {
            return Err(TxnError::InvalidConfig("at least one partition is required".into()));
        }
        if self.keys_per_partition == 0 {
            return Err(TxnError::InvalidConfig("keys_per_partition must be positive".into()));
        }
        if self.total_keys() < 2 {
            return Err(TxnError::InvalidConfig(
                "the store needs at least two keys for transfers".into(),
            ));
        }
        if self.min_txn_ops > self.max_txn_ops {
            return Err(TxnError::InvalidConfig(format!(
                "min_txn_ops ({}) exceeds max_txn_ops ({})",
                self.min_txn_ops, self.max_txn_ops
            )));
        }
        if self.initial_value < 0 {
            return Err(TxnError::InvalidConfig("initial_value must not be negative".into()));
        }
        for (name, p) in [
            ("coordinator_crash_probability", self.coordinator_crash_probability),
            ("partition_crash_probability", self.partition_crash_probability),
            ("write_probability", self.write_probability),
            ("commit_probability", self.commit_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(TxnError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.vote_timeout_ms == 0 || self.decision_timeout_ms == 0 || self.accept_timeout_ms == 0
        {
            return Err(TxnError::InvalidConfig("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Total number of keys in the store.
    pub fn total_keys(&self) -> u32 {
        self.partitions.saturating_mul(self.keys_per_partition)
    }

    /// Sum of all rows before any transaction commits.
    pub fn expected_total(&self) -> i64 {
        i64::from(self.total_keys()) * self.initial_value
    }

    /// Coordinator vote timeout.
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    /// Partition decision timeout.
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    /// Client accept timeout.
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    /// Coordinator downtime after a crash.
    pub fn coordinator_recovery(&self) -> Duration {
        Duration::from_millis(self.coordinator_recovery_ms)
    }

    /// Partition downtime after a crash.
    pub fn partition_recovery(&self) -> Duration {
        Duration::from_millis(self.partition_recovery_ms)
    }

    /// Pause between two transactions of a client.
    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }
}
