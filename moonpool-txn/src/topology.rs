//! Static cluster layout: who exists and which partition owns which key.

use std::ops::Range;

use crate::client::Client;
use crate::config::TxnConfig;
use crate::coordinator::Coordinator;
use crate::partition::Partition;
use crate::process::Process;
use crate::types::{Key, ProcessId};

/// Cluster membership and the key→partition map.
///
/// Partition `p` owns keys `[p * keys_per_partition, (p + 1) * keys_per_partition)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    coordinators: u32,
    partitions: u32,
    clients: u32,
    keys_per_partition: u32,
}

impl Topology {
    /// Create a topology.
    pub const fn new(coordinators: u32, partitions: u32, clients: u32, keys_per_partition: u32) -> Self {
        Self {
            coordinators,
            partitions,
            clients,
            keys_per_partition,
        }
    }

    /// Topology described by a configuration.
    pub fn from_config(config: &TxnConfig) -> Self {
        Self::new(
            config.coordinators,
            config.partitions,
            config.clients,
            config.keys_per_partition,
        )
    }

    /// Partition index owning `key`, or `None` if the key is outside the store.
    pub fn partition_of(&self, key: Key) -> Option<u32> {
        if self.keys_per_partition == 0 {
            return None;
        }
        let partition = key / self.keys_per_partition;
        (partition < self.partitions).then_some(partition)
    }

    /// Offset of `key` inside its partition.
    pub fn row_of(&self, key: Key) -> usize {
        (key % self.keys_per_partition.max(1)) as usize
    }

    /// Keys owned by `partition`.
    pub fn key_range(&self, partition: u32) -> Range<Key> {
        let start = partition * self.keys_per_partition;
        start..start + self.keys_per_partition
    }

    /// Number of keys in the store.
    pub fn total_keys(&self) -> u32 {
        self.partitions * self.keys_per_partition
    }

    /// Keys owned by each partition.
    pub fn keys_per_partition(&self) -> u32 {
        self.keys_per_partition
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> u32 {
        self.partitions
    }

    /// Number of coordinators.
    pub fn coordinator_count(&self) -> u32 {
        self.coordinators
    }

    /// Number of clients.
    pub fn client_count(&self) -> u32 {
        self.clients
    }

    /// Every coordinator id.
    pub fn coordinators(&self) -> impl Iterator<Item = ProcessId> {
        (0..self.coordinators).map(ProcessId::Coordinator)
    }

    /// Every partition id.
    pub fn partitions(&self) -> impl Iterator<Item = ProcessId> {
        (0..self.partitions).map(ProcessId::Partition)
    }

    /// Every client id.
    pub fn clients(&self) -> impl Iterator<Item = ProcessId> {
        (0..self.clients).map(ProcessId::Client)
    }

    /// Build one process per member: coordinators, then partitions, then clients.
    pub fn build_processes(&self, config: &TxnConfig) -> Vec<Box<dyn Process>> {
        let mut processes: Vec<Box<dyn Process>> = Vec::new();
        for c in 0..self.coordinators {
            processes.push(Box::new(Coordinator::new(c, *self, config.clone())));
        }
        for p in 0..self.partitions {
            processes.push(Box::new(Partition::new(p, *self, config.clone())));
        }
        for c in 0..self.clients {
            processes.push(Box::new(Client::new(c, *self, config.clone())));
        }
        processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_routing() {
        let topology = Topology::new(1, 3, 1, 10);
        assert_eq!(topology.partition_of(0), Some(0));
        assert_eq!(topology.partition_of(9), Some(0));
        assert_eq!(topology.partition_of(10), Some(1));
        assert_eq!(topology.partition_of(29), Some(2));
        assert_eq!(topology.partition_of(30), None);
        assert_eq!(topology.row_of(27), 7);
        assert_eq!(topology.key_range(2), 20..30);
        assert_eq!(topology.total_keys(), 30);
    }

    #[test]
    fn test_ranges_are_disjoint_and_cover_store() {
        let topology = Topology::new(1, 4, 1, 7);
        let mut covered = Vec::new();
        for p in 0..topology.partition_count() {
            for key in topology.key_range(p) {
                assert_eq!(topology.partition_of(key), Some(p));
                covered.push(key);
            }
        }
        assert_eq!(covered, (0..topology.total_keys()).collect::<Vec<_>>());
    }

    #[test]
    fn test_build_processes_order() {
        let config = TxnConfig {
            coordinators: 2,
            partitions: 2,
            clients: 1,
            ..TxnConfig::default()
        };
        let topology = Topology::from_config(&config);
        let ids: Vec<ProcessId> = topology
            .build_processes(&config)
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(
            ids,
            vec![
                ProcessId::Coordinator(0),
                ProcessId::Coordinator(1),
                ProcessId::Partition(0),
                ProcessId::Partition(1),
                ProcessId::Client(0),
            ]
        );
    }
}
