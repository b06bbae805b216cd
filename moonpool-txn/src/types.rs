//! Core value types shared by every process in the store.
//!
//! - [`Key`], [`Value`], [`Version`]: the data model of a row
//! - [`VersionedValue`]: a committed (or snapshotted) row
//! - [`TxnId`]: globally unique transaction identifier
//! - [`Outcome`]: the terminal decision of a transaction
//! - [`ProcessId`]: address of a coordinator, partition or client

use serde::{Deserialize, Serialize};

/// Row key. Keys are dense integers starting at zero.
pub type Key = u32;

/// Row value.
pub type Value = i64;

/// Per-row version, incremented once per committed write.
pub type Version = u64;

/// A value together with the version it was committed at.
///
/// Inside a workspace, `version` is the committed version observed when the
/// transaction first touched the key; validation compares it against the
/// current committed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Number of committed writes applied to the row.
    pub version: Version,
    /// Current value of the row.
    pub value: Value,
}

impl VersionedValue {
    /// Create a versioned value.
    pub const fn new(version: Version, value: Value) -> Self {
        Self { version, value }
    }

    /// The row after committing `value` on top of this one.
    pub const fn next(self, value: Value) -> Self {
        Self {
            version: self.version + 1,
            value,
        }
    }
}

/// Transaction identifier.
///
/// Unique across coordinators: the issuing coordinator's index plus a
/// per-coordinator sequence number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TxnId {
    /// Index of the coordinator that issued the id.
    pub coordinator: u32,
    /// Sequence number local to that coordinator.
    pub seq: u64,
}

impl TxnId {
    /// Create a transaction id.
    pub const fn new(coordinator: u32, seq: u64) -> Self {
        Self { coordinator, seq }
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}-{}", self.coordinator, self.seq)
    }
}

/// Terminal decision of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Every write of the transaction becomes visible.
    Commit,
    /// No write of the transaction becomes visible.
    Abort,
}

impl Outcome {
    /// Map the wire `commit` flag to an outcome.
    pub const fn from_commit(commit: bool) -> Self {
        if commit {
            Outcome::Commit
        } else {
            Outcome::Abort
        }
    }

    /// Whether this is [`Outcome::Commit`].
    pub const fn is_commit(self) -> bool {
        matches!(self, Outcome::Commit)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Commit => write!(f, "COMMIT"),
            Outcome::Abort => write!(f, "ABORT"),
        }
    }
}

/// Address of a process in the cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProcessId {
    /// Transaction coordinator `n`.
    Coordinator(u32),
    /// Data partition `n`, owning keys `[n * keys_per_partition, (n + 1) * keys_per_partition)`.
    Partition(u32),
    /// Workload client `n`.
    Client(u32),
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessId::Coordinator(n) => write!(f, "coordinator-{}", n),
            ProcessId::Partition(n) => write!(f, "partition-{}", n),
            ProcessId::Client(n) => write!(f, "client-{}", n),
        }
    }
}
