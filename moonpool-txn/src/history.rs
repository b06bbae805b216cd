//! Ledger of protocol events.
//!
//! Processes append [`ProtocolEvent`]s through their context; the runtime
//! stamps them with time and origin. Invariants read the ledger to check
//! cross-process properties such as atomic commitment.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::{Outcome, ProcessId, TxnId, Value};

/// Something a process did that cross-process checks care about.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A partition sent its vote.
    Voted {
        /// Transaction voted on.
        txn: TxnId,
        /// `true` for YES.
        commit: bool,
    },
    /// A coordinator fixed the decision of a transaction.
    Decided {
        /// Decided transaction.
        txn: TxnId,
        /// The decision.
        outcome: Outcome,
    },
    /// A partition applied (or unilaterally fixed) an outcome.
    Applied {
        /// Transaction.
        txn: TxnId,
        /// Outcome applied locally.
        outcome: Outcome,
        /// Rows installed at a new version (zero unless committed).
        installed: usize,
    },
    /// A client learned the outcome of its transaction.
    ClientResult {
        /// Transaction.
        txn: TxnId,
        /// Outcome reported by the coordinator.
        outcome: Outcome,
    },
    /// A consistency audit collected every partition's sum.
    AuditCompleted {
        /// Transaction that triggered the audit.
        txn: TxnId,
        /// Sum over all partitions.
        total: Value,
    },
    /// The process entered the crashed state.
    Crashed,
    /// The process left the crashed state.
    Recovered,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// When the event happened.
    pub at: Duration,
    /// Process that recorded it.
    pub process: ProcessId,
    /// What happened.
    pub event: ProtocolEvent,
}

/// Append-only event ledger with per-transaction indexes.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    decisions: BTreeMap<TxnId, Outcome>,
    applied: BTreeMap<TxnId, Vec<(ProcessId, Outcome)>>,
    mark: usize,
}

impl History {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, at: Duration, process: ProcessId, event: ProtocolEvent) {
        match &event {
            ProtocolEvent::Decided { txn, outcome } => {
                self.decisions.entry(*txn).or_insert(*outcome);
            }
            ProtocolEvent::Applied { txn, outcome, .. } => {
                self.applied
                    .entry(*txn)
                    .or_default()
                    .push((process, *outcome));
            }
            _ => {}
        }
        self.entries.push(HistoryEntry { at, process, event });
    }

    /// Start a new step: [`recent`](Self::recent) will only return events
    /// pushed after this call.
    pub fn mark(&mut self) {
        self.mark = self.entries.len();
    }

    /// Events pushed since the last [`mark`](Self::mark).
    pub fn recent(&self) -> &[HistoryEntry] {
        &self.entries[self.mark.min(self.entries.len())..]
    }

    /// All events in order.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// First decision recorded for `txn` by a coordinator.
    pub fn decision(&self, txn: TxnId) -> Option<Outcome> {
        self.decisions.get(&txn).copied()
    }

    /// Outcomes applied by partitions for `txn`.
    pub fn applied(&self, txn: TxnId) -> &[(ProcessId, Outcome)] {
        self.applied.get(&txn).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of transactions decided with `outcome`.
    pub fn decided_count(&self, outcome: Outcome) -> usize {
        self.decisions.values().filter(|o| **o == outcome).count()
    }

    /// Number of outcomes delivered to clients.
    pub fn client_results(&self) -> usize {
        self.count(|e| matches!(e, ProtocolEvent::ClientResult { .. }))
    }

    /// Number of crashes across all processes.
    pub fn crashes(&self) -> usize {
        self.count(|e| matches!(e, ProtocolEvent::Crashed))
    }

    /// Number of events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ProtocolEvent) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.event)).count()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(seq: u64) -> TxnId {
        TxnId::new(0, seq)
    }

    #[test]
    fn test_first_decision_wins() {
        let mut history = History::new();
        let c = ProcessId::Coordinator(0);
        history.push(Duration::ZERO, c, ProtocolEvent::Decided { txn: txn(1), outcome: Outcome::Commit });
        history.push(Duration::ZERO, c, ProtocolEvent::Decided { txn: txn(1), outcome: Outcome::Abort });
        assert_eq!(history.decision(txn(1)), Some(Outcome::Commit));
        assert_eq!(history.decided_count(Outcome::Commit), 1);
        assert_eq!(history.decision(txn(2)), None);
    }

    #[test]
    fn test_applied_index_and_recent_window() {
        let mut history = History::new();
        history.push(
            Duration::from_millis(1),
            ProcessId::Partition(0),
            ProtocolEvent::Applied { txn: txn(4), outcome: Outcome::Abort, installed: 0 },
        );
        history.mark();
        assert!(history.recent().is_empty());

        history.push(
            Duration::from_millis(2),
            ProcessId::Partition(1),
            ProtocolEvent::Applied { txn: txn(4), outcome: Outcome::Abort, installed: 0 },
        );
        assert_eq!(history.recent().len(), 1);
        assert_eq!(history.applied(txn(4)).len(), 2);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_counters() {
        let mut history = History::new();
        let client = ProcessId::Client(0);
        history.push(Duration::ZERO, client, ProtocolEvent::ClientResult { txn: txn(1), outcome: Outcome::Abort });
        history.push(Duration::ZERO, ProcessId::Partition(2), ProtocolEvent::Crashed);
        assert_eq!(history.client_results(), 1);
        assert_eq!(history.crashes(), 1);
        assert!(!history.is_empty());
    }
}
