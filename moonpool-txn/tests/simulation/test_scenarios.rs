//! Simulation test scenarios.
//!
//! ## Test Organization
//!
//! - `test_*`: Fast tests (a handful of fixed seeds)
//! - `slow_simulation_*`: Many iterations, random configuration and network

use std::time::Duration;

use moonpool_txn::chaos::{buggify_init, buggify_reset};
use moonpool_txn::sim::{reset_sim_rng, set_sim_seed};
use moonpool_txn::{
    Coordinator, HistoryEntry, Message, NetworkConfiguration, Outcome, Partition, Process,
    ProcessId, SimWorld, SimulationBuilder, SimulationReport, Topology, TxnConfig, TxnId,
};

use super::invariants::{NoOverdraft, VersionsCountInstalls};

// ============================================================================
// Test Utilities
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn assert_simulation_success(report: &SimulationReport) {
    if !report.seeds_failing.is_empty() {
        panic!(
            "Simulation had {} failing seeds: {:?}\n{}",
            report.seeds_failing.len(),
            report.seeds_failing,
            report
        );
    }
}

fn cluster_simulation(config: TxnConfig) -> SimulationBuilder {
    let topology = Topology::from_config(&config);
    SimulationBuilder::new()
        .config(config)
        .standard_invariants()
        .invariant(NoOverdraft::new(topology))
        .invariant(VersionsCountInstalls::new(topology))
}

// ============================================================================
// Fault-free runs
// ============================================================================

#[test]
fn test_fast_local_without_faults() {
    init_tracing();
    let report = cluster_simulation(TxnConfig::fast_local())
        .network(NetworkConfiguration::fast_local())
        .set_debug_seeds(vec![1, 2, 3, 4, 5])
        .set_iterations(5)
        .run();

    assert_simulation_success(&report);
    assert_eq!(report.successful_runs, 5);
    assert_eq!(report.metrics.crashes, 0);
    assert!(report.metrics.commits > 0, "no transaction ever committed");
}

#[test]
fn test_single_partition_cluster() {
    init_tracing();
    let config = TxnConfig {
        partitions: 1,
        ..TxnConfig::fast_local()
    };
    let report = cluster_simulation(config)
        .set_debug_seeds(vec![11, 12, 13])
        .set_iterations(3)
        .run();

    assert_simulation_success(&report);
}

#[test]
fn test_contended_keys() {
    init_tracing();
    // Two keys and many clients: most transactions conflict.
    let config = TxnConfig {
        partitions: 2,
        keys_per_partition: 1,
        clients: 4,
        ..TxnConfig::fast_local()
    };
    let report = cluster_simulation(config)
        .set_debug_seeds(vec![21, 22, 23])
        .set_iterations(3)
        .run();

    assert_simulation_success(&report);
    assert!(report.metrics.aborts > 0, "contention never caused an abort");
}

// ============================================================================
// Crash and recovery
// ============================================================================

#[test]
fn test_partition_crashes() {
    init_tracing();
    let config = TxnConfig {
        partition_crash_probability: 0.2,
        ..TxnConfig::fast_local()
    };
    let report = cluster_simulation(config)
        .set_debug_seeds(vec![31, 32, 33, 34])
        .set_iterations(4)
        .run();

    assert_simulation_success(&report);
    assert!(report.metrics.crashes > 0, "no partition ever crashed");
}

#[test]
fn test_coordinator_crashes() {
    init_tracing();
    let config = TxnConfig {
        coordinator_crash_probability: 0.1,
        ..TxnConfig::fast_local()
    };
    let report = cluster_simulation(config)
        .set_debug_seeds(vec![41, 42, 43, 44])
        .set_iterations(4)
        .run();

    assert_simulation_success(&report);
}

#[test]
fn test_chaos_preset() {
    init_tracing();
    let report = cluster_simulation(TxnConfig::chaos())
        .random_network()
        .set_iterations(8)
        .run();

    assert_simulation_success(&report);
}

#[test]
fn test_coordinator_crash_after_vote_request_aborts() {
    init_tracing();
    reset_sim_rng();
    set_sim_seed(7);
    buggify_init(0.0);

    let config = TxnConfig {
        coordinators: 1,
        partitions: 2,
        clients: 0,
        coordinator_crash_probability: 1.0,
        ..TxnConfig::default()
    };
    let topology = Topology::from_config(&config);
    let mut world = SimWorld::new(NetworkConfiguration::fast_local());
    world
        .spawn(Box::new(Coordinator::new(0, topology, config.clone())))
        .expect("spawn coordinator");
    for p in 0..2 {
        world
            .spawn(Box::new(Partition::new(p, topology, config.clone())))
            .expect("spawn partition");
    }
    world.run_until(Duration::from_millis(10));

    // The client is not part of the world: its replies are dropped.
    let client = ProcessId::Client(0);
    let coordinator = ProcessId::Coordinator(0);
    world
        .inject(client, coordinator, Message::TxnBegin { client_id: 0 })
        .expect("inject begin");
    world.run_until(Duration::from_millis(20));
    for (key, value) in [(0, 50), (15, 150)] {
        world
            .inject(client, coordinator, Message::Write { client_id: 0, key, value, txn: None })
            .expect("inject write");
    }
    world.run_until(Duration::from_millis(30));
    world
        .inject(client, coordinator, Message::TxnEnd { client_id: 0, commit: true })
        .expect("inject end");
    world.run_until(Duration::from_millis(40));
    assert!(world.coordinator(0).expect("coordinator").is_crashed());

    world.run(&[]).expect("run to quiescence");

    let txn = TxnId::new(0, 0);
    assert_eq!(world.coordinator(0).expect("coordinator").decision(txn), Some(Outcome::Abort));
    assert_eq!(world.history().decision(txn), Some(Outcome::Abort));
    for partition in world.partitions() {
        assert_eq!(partition.decision(txn), Some(Some(Outcome::Abort)));
        assert_eq!(partition.held_locks(), 0);
        assert_eq!(partition.sum(), partition.initial_sum());
    }
    buggify_reset();
}

// ============================================================================
// Determinism
// ============================================================================

fn history_for_seed(seed: u64) -> Vec<HistoryEntry> {
    reset_sim_rng();
    set_sim_seed(seed);
    buggify_init(0.5);
    let mut world = SimWorld::from_config(&TxnConfig::chaos(), NetworkConfiguration::default())
        .expect("valid config");
    world.run(&[]).expect("quiesces");
    buggify_reset();
    world.history().entries().to_vec()
}

#[test]
fn test_same_seed_same_history() {
    init_tracing();
    let first = history_for_seed(99);
    let second = history_for_seed(99);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_processes_expose_their_ids() {
    let config = TxnConfig::fast_local();
    let topology = Topology::from_config(&config);
    let ids: Vec<ProcessId> = topology
        .build_processes(&config)
        .iter()
        .map(|p| p.id())
        .collect();
    assert_eq!(
        ids.len() as u32,
        config.coordinators + config.partitions + config.clients
    );
    assert_eq!(ids[0], ProcessId::Coordinator(0));
}

// ============================================================================
// Slow simulations
// ============================================================================

#[test]
fn slow_simulation_random_configs() {
    init_tracing();
    let report = SimulationBuilder::new()
        .standard_invariants()
        .random_config()
        .random_network()
        .set_iterations(50)
        .run();

    assert_simulation_success(&report);
}

#[test]
fn slow_simulation_default_workload_with_crashes() {
    init_tracing();
    let config = TxnConfig {
        coordinator_crash_probability: 0.02,
        partition_crash_probability: 0.05,
        txns_per_client: 3,
        ..TxnConfig::default()
    };
    let report = cluster_simulation(config).set_iterations(10).run();

    assert_simulation_success(&report);
}

#[test]
#[ignore]
fn debug_single_seed() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    let report = cluster_simulation(TxnConfig::chaos())
        .set_debug_seeds(vec![0])
        .set_iterations(1)
        .run();
    eprintln!("{report}");
    assert_simulation_success(&report);
}
