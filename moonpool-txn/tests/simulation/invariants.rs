//! Extra invariant checkers for the simulation tests.
//!
//! ## Safety Properties (assert_always!)
//!
//! 1. **No overdraft**: a committed value never goes negative. Transfers
//!    take at most what the client read, and OCC rejects stale reads.
//! 2. **Versions count installs**: once idle, the versions of a partition's
//!    rows add up to the number of rows its commits installed, read-only
//!    rows included.

use moonpool_txn::{assert_always, Invariant, Outcome, ProcessId, ProtocolEvent, SimWorld, Topology};

/// Committed values stay non-negative.
pub struct NoOverdraft {
    topology: Topology,
}

impl NoOverdraft {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }
}

impl Invariant for NoOverdraft {
    fn name(&self) -> &str {
        "no_overdraft"
    }

    fn check(&self, world: &SimWorld, _sim_time_ms: u64) {
        for partition in world.partitions() {
            for key in self.topology.key_range(partition.index()) {
                let Some(row) = partition.committed(key) else {
                    continue;
                };
                assert_always!(
                    row.value >= 0,
                    format!("key {} committed a negative value {}", key, row.value)
                );
            }
        }
    }
}

/// Row versions match the installs recorded in the ledger.
pub struct VersionsCountInstalls {
    topology: Topology,
}

impl VersionsCountInstalls {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }
}

impl Invariant for VersionsCountInstalls {
    fn name(&self) -> &str {
        "versions_count_installs"
    }

    fn check(&self, world: &SimWorld, _sim_time_ms: u64) {
        if !world.is_quiescent() {
            return;
        }
        for partition in world.partitions() {
            let versions: u64 = self
                .topology
                .key_range(partition.index())
                .filter_map(|key| partition.committed(key))
                .map(|row| row.version)
                .sum();
            let me = ProcessId::Partition(partition.index());
            let installed: usize = world
                .history()
                .entries()
                .iter()
                .filter(|entry| entry.process == me)
                .map(|entry| match entry.event {
                    ProtocolEvent::Applied {
                        outcome: Outcome::Commit,
                        installed,
                        ..
                    } => installed,
                    _ => 0,
                })
                .sum();
            assert_always!(
                versions == installed as u64,
                format!(
                    "partition {} has version sum {} but installed {} rows",
                    partition.index(),
                    versions,
                    installed
                )
            );
        }
    }
}
