//! Cross-process invariants checked by the simulation runner.
//!
//! Invariants run after every simulation event and panic (through
//! `assert_always!`) on violation. Properties that only hold once the
//! cluster is idle check [`SimWorld::is_quiescent`] first.
//!
//! | Invariant | When | Property |
//! |---|---|---|
//! | [`AtomicCommitment`] | every event | partitions apply the coordinator's decision |
//! | [`ConservationLaw`] | quiescent | committed sum equals the initial sum |
//! | [`LockHygiene`] | quiescent | no lock held, no partition in doubt |
//! | [`ClientsFinished`] | quiescent | every client ran its whole workload |

use crate::assert_always;
use crate::history::ProtocolEvent;
use crate::sim::SimWorld;

/// A named property of a running cluster.
pub trait Invariant {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Check the property. Panics on violation.
    fn check(&self, world: &SimWorld, sim_time_ms: u64);
}

/// Create a boxed invariant from a name and closure.
pub fn invariant_fn<F>(name: impl Into<String>, check: F) -> Box<dyn Invariant>
where
    F: Fn(&SimWorld, u64) + 'static,
{
    Box::new(FnInvariant {
        name: name.into(),
        check,
    })
}

struct FnInvariant<F> {
    name: String,
    check: F,
}

impl<F> Invariant for FnInvariant<F>
where
    F: Fn(&SimWorld, u64),
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, world: &SimWorld, sim_time_ms: u64) {
        (self.check)(world, sim_time_ms);
    }
}

/// Every outcome a partition applies equals the coordinator's decision.
///
/// A partition that voted NO settles ABORT before the coordinator decides;
/// the check then happens when the decision is recorded.
pub struct AtomicCommitment;

impl Invariant for AtomicCommitment {
    fn name(&self) -> &str {
        "atomic_commitment"
    }

    fn check(&self, world: &SimWorld, _sim_time_ms: u64) {
        let history = world.history();
        for entry in history.recent() {
            let txn = match &entry.event {
                ProtocolEvent::Applied { txn, .. } | ProtocolEvent::Decided { txn, .. } => *txn,
                _ => continue,
            };
            let Some(decision) = history.decision(txn) else {
                continue;
            };
            for (partition, applied) in history.applied(txn) {
                assert_always!(
                    *applied == decision,
                    format!(
                        "{} applied {} for {} but the coordinator decided {}",
                        partition, applied, txn, decision
                    )
                );
            }
        }
    }
}

/// Transfers never create or destroy value.
pub struct ConservationLaw;

impl Invariant for ConservationLaw {
    fn name(&self) -> &str {
        "conservation_law"
    }

    fn check(&self, world: &SimWorld, _sim_time_ms: u64) {
        if !world.is_quiescent() {
            return;
        }
        let (total, expected) = world
            .partitions()
            .fold((0, 0), |(t, e), p| (t + p.sum(), e + p.initial_sum()));
        assert_always!(
            total == expected,
            format!("conservation law violated: committed sum {} != initial sum {}", total, expected)
        );
    }
}

/// Once idle, no partition holds a lock or waits for a decision.
pub struct LockHygiene;

impl Invariant for LockHygiene {
    fn name(&self) -> &str {
        "lock_hygiene"
    }

    fn check(&self, world: &SimWorld, _sim_time_ms: u64) {
        if !world.is_quiescent() {
            return;
        }
        for partition in world.partitions() {
            assert_always!(
                partition.held_locks() == 0,
                format!("partition {} still holds {} locks", partition.index(), partition.held_locks())
            );
            let undecided = partition.undecided();
            assert_always!(
                undecided.is_empty(),
                format!("partition {} is still in doubt about {:?}", partition.index(), undecided)
            );
        }
    }
}

/// Once idle, every client has run all its transactions.
pub struct ClientsFinished;

impl Invariant for ClientsFinished {
    fn name(&self) -> &str {
        "clients_finished"
    }

    fn check(&self, world: &SimWorld, _sim_time_ms: u64) {
        if !world.is_quiescent() {
            return;
        }
        for client in world.clients() {
            assert_always!(
                client.is_finished(),
                format!(
                    "client {} stopped after {} of its transactions",
                    client.index(),
                    client.attempted()
                )
            );
        }
    }
}

/// The invariants every transactional simulation should hold.
pub fn standard_invariants() -> Vec<Box<dyn Invariant>> {
    vec![
        Box::new(AtomicCommitment),
        Box::new(ConservationLaw),
        Box::new(LockHygiene),
        Box::new(ClientsFinished),
    ]
}
