//! Coordinator: transaction front door and 2PC decision maker.
//!
//! Clients open a transaction at any coordinator, route every read and
//! write through it, and finally ask it to commit or abort. On commit the
//! coordinator runs two-phase commit against every partition.
//!
//! ## Per-transaction lifecycle
//!
//! ```text
//!          TxnBegin            TxnEnd(commit)
//!   ─────────────────► ACTIVE ────────────────► VOTING
//!                        │                        │ all YES → COMMIT
//!        TxnEnd(abort)   │                        │ any NO / vote timeout → ABORT
//!        re-begin        ▼                        ▼
//!                     DECIDED(ABORT)          DECIDED(outcome)
//!                            │                    │
//!                            └──► multicast Decision, TxnResult to client ──► CLEARED
//! ```
//!
//! ## State
//!
//! | Field | Purpose |
//! |---|---|
//! | `records` | live transactions, deleted once the client has its result |
//! | `client_txns` | current transaction of each client at this coordinator |
//! | `history` | every decision ever made, kept to answer `DecisionRequest`s |
//! | `audits` | consistency checks collecting per-partition sums |
//!
//! ## Crashes
//!
//! A coordinator may crash right after multicasting a vote request or a
//! decision. On recovery every undecided live transaction is aborted, every
//! live transaction is finished (decision multicast, client notified), and
//! every decision in the history is multicast again so partitions that
//! missed it while either side was down can settle.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::assert_sometimes;
use crate::config::TxnConfig;
use crate::crash::{CrashRecovery, Recoverable};
use crate::history::ProtocolEvent;
use crate::message::Message;
use crate::process::{Context, Process, TimerHandle};
use crate::topology::Topology;
use crate::types::{Key, Outcome, ProcessId, TxnId, Value};

/// Phase of a live transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPhase {
    /// Accepting reads and writes.
    Active,
    /// Collecting votes.
    Voting,
    /// Decision fixed, result not yet delivered.
    Decided(Outcome),
}

#[derive(Debug)]
struct TxnRecord {
    client: ProcessId,
    phase: TxnPhase,
    yes_voters: BTreeSet<u32>,
    vote_timer: Option<TimerHandle>,
}

/// A transaction coordinator.
pub struct Coordinator {
    index: u32,
    topology: Topology,
    config: TxnConfig,
    next_seq: u64,
    records: BTreeMap<TxnId, TxnRecord>,
    client_txns: BTreeMap<ProcessId, TxnId>,
    history: BTreeMap<TxnId, Outcome>,
    audits: BTreeMap<TxnId, BTreeMap<u32, Value>>,
    crash: CrashRecovery,
}

impl Coordinator {
    /// Create coordinator `index`.
    pub fn new(index: u32, topology: Topology, config: TxnConfig) -> Self {
        Self {
            index,
            topology,
            config,
            next_seq: 0,
            records: BTreeMap::new(),
            client_txns: BTreeMap::new(),
            history: BTreeMap::new(),
            audits: BTreeMap::new(),
            crash: CrashRecovery::new(),
        }
    }

    /// Index of this coordinator.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Decision recorded for `txn`, if any.
    pub fn decision(&self, txn: TxnId) -> Option<Outcome> {
        self.history.get(&txn).copied()
    }

    /// Phase of a live transaction.
    pub fn phase(&self, txn: TxnId) -> Option<TxnPhase> {
        self.records.get(&txn).map(|r| r.phase)
    }

    /// Number of live transactions.
    pub fn live_transactions(&self) -> usize {
        self.records.len()
    }

    /// Number of decisions made so far.
    pub fn decisions_made(&self) -> usize {
        self.history.len()
    }

    /// Number of audits still waiting for partition sums.
    pub fn pending_audits(&self) -> usize {
        self.audits.len()
    }

    /// Whether the coordinator is crashed.
    pub fn is_crashed(&self) -> bool {
        self.crash.is_crashed()
    }

    fn me(&self) -> ProcessId {
        ProcessId::Coordinator(self.index)
    }

    /// The client's current transaction, if it is still accepting operations.
    fn active_txn_of(&self, client: ProcessId) -> Option<TxnId> {
        let txn = *self.client_txns.get(&client)?;
        match self.records.get(&txn) {
            Some(record) if record.phase == TxnPhase::Active => Some(txn),
            _ => None,
        }
    }

    fn route(&self, key: Key) -> Option<ProcessId> {
        self.topology.partition_of(key).map(ProcessId::Partition)
    }

    fn maybe_crash(&mut self, ctx: &mut dyn Context) -> bool {
        if ctx.random_f64() < self.config.coordinator_crash_probability {
            let recover_after = self.config.coordinator_recovery();
            self.crash(ctx, recover_after);
            return true;
        }
        false
    }

    // =========================================================================
    // Client-facing operations
    // =========================================================================

    fn handle_begin(&mut self, ctx: &mut dyn Context, from: ProcessId, client_id: u32) {
        // A client re-sends TxnBegin after an accept timeout; its previous
        // transaction here was abandoned before any vote.
        if let Some(previous) = self.active_txn_of(from) {
            info!(coordinator = self.index, txn = %previous, client = client_id, "client restarted, aborting abandoned transaction");
            self.fix_decision(ctx, previous, Outcome::Abort);
            self.multicast_decision(ctx, previous, Outcome::Abort);
            self.records.remove(&previous);
        }

        let txn = TxnId::new(self.index, self.next_seq);
        self.next_seq += 1;
        self.records.insert(
            txn,
            TxnRecord {
                client: from,
                phase: TxnPhase::Active,
                yes_voters: BTreeSet::new(),
                vote_timer: None,
            },
        );
        self.client_txns.insert(from, txn);
        debug!(coordinator = self.index, txn = %txn, client = client_id, "transaction begins");
        ctx.send(from, Message::TxnAccept);
    }

    fn handle_read(&mut self, ctx: &mut dyn Context, from: ProcessId, client_id: u32, key: Key) {
        let Some(txn) = self.active_txn_of(from) else {
            debug!(coordinator = self.index, client = client_id, key, "read outside an active transaction");
            return;
        };
        let Some(partition) = self.route(key) else {
            warn!(coordinator = self.index, txn = %txn, key, "read of a key outside the store");
            return;
        };
        ctx.send(
            partition,
            Message::Read {
                client_id,
                key,
                txn: Some(txn),
            },
        );
    }

    fn handle_read_result(&mut self, ctx: &mut dyn Context, client_id: u32, key: Key, value: Value, txn: TxnId) {
        let Some(record) = self.records.get(&txn) else {
            debug!(coordinator = self.index, txn = %txn, key, "read result for a finished transaction");
            return;
        };
        if record.phase != TxnPhase::Active || self.client_txns.get(&record.client) != Some(&txn) {
            debug!(coordinator = self.index, txn = %txn, key, "read result for a superseded transaction");
            return;
        }
        ctx.send(
            record.client,
            Message::ReadResult {
                client_id,
                key,
                value,
                txn,
            },
        );
    }

    fn handle_write(&mut self, ctx: &mut dyn Context, from: ProcessId, client_id: u32, key: Key, value: Value) {
        let Some(txn) = self.active_txn_of(from) else {
            debug!(coordinator = self.index, client = client_id, key, "write outside an active transaction");
            return;
        };
        let Some(partition) = self.route(key) else {
            warn!(coordinator = self.index, txn = %txn, key, "write of a key outside the store");
            return;
        };
        ctx.send(
            partition,
            Message::Write {
                client_id,
                key,
                value,
                txn: Some(txn),
            },
        );
    }

    fn handle_end(&mut self, ctx: &mut dyn Context, from: ProcessId, client_id: u32, commit: bool) {
        let Some(txn) = self.active_txn_of(from) else {
            debug!(coordinator = self.index, client = client_id, "end outside an active transaction");
            return;
        };
        if !commit {
            info!(coordinator = self.index, txn = %txn, "client aborts");
            self.decide(ctx, txn, Outcome::Abort);
            return;
        }

        let timer = ctx.schedule(
            self.config.vote_timeout(),
            Message::Timeout {
                txn,
                participant: None,
            },
        );
        if let Some(record) = self.records.get_mut(&txn) {
            record.phase = TxnPhase::Voting;
            record.yes_voters.clear();
            record.vote_timer = Some(timer);
        }
        debug!(coordinator = self.index, txn = %txn, "requesting votes");
        for partition in self.topology.partitions() {
            ctx.send(partition, Message::VoteRequest { txn });
        }
        self.maybe_crash(ctx);
    }

    // =========================================================================
    // Two-phase commit
    // =========================================================================

    fn handle_vote(&mut self, ctx: &mut dyn Context, from: ProcessId, txn: TxnId, commit: bool) {
        let ProcessId::Partition(partition) = from else {
            warn!(coordinator = self.index, txn = %txn, from = %from, "vote from a non-partition");
            return;
        };
        let partitions = self.topology.partition_count() as usize;
        let all_yes = match self.records.get_mut(&txn) {
            Some(record) if record.phase == TxnPhase::Voting => {
                if !commit {
                    None
                } else {
                    record.yes_voters.insert(partition);
                    Some(record.yes_voters.len() == partitions)
                }
            }
            _ => {
                debug!(coordinator = self.index, txn = %txn, partition, "late vote ignored");
                return;
            }
        };
        match all_yes {
            None => {
                info!(coordinator = self.index, txn = %txn, partition, "NO vote");
                self.decide(ctx, txn, Outcome::Abort);
            }
            Some(true) => self.decide(ctx, txn, Outcome::Commit),
            Some(false) => {}
        }
    }

    fn handle_vote_timeout(&mut self, ctx: &mut dyn Context, txn: TxnId) {
        let voting = self
            .records
            .get(&txn)
            .is_some_and(|r| r.phase == TxnPhase::Voting);
        if voting {
            info!(coordinator = self.index, txn = %txn, "vote timeout");
            self.decide(ctx, txn, Outcome::Abort);
        }
    }

    fn handle_decision_request(&mut self, ctx: &mut dyn Context, from: ProcessId, txn: TxnId) {
        if let Some(outcome) = self.history.get(&txn) {
            debug!(coordinator = self.index, txn = %txn, to = %from, "answering decision request");
            ctx.send(
                from,
                Message::Decision {
                    txn,
                    commit: outcome.is_commit(),
                },
            );
        }
    }

    /// Fix the decision (first write wins) and cancel the vote timer.
    fn fix_decision(&mut self, ctx: &mut dyn Context, txn: TxnId, outcome: Outcome) -> Outcome {
        let fresh = !self.history.contains_key(&txn);
        let fixed = *self.history.entry(txn).or_insert(outcome);
        if let Some(record) = self.records.get_mut(&txn) {
            record.phase = TxnPhase::Decided(fixed);
            if let Some(timer) = record.vote_timer.take() {
                ctx.cancel(timer);
            }
        }
        if fresh {
            ctx.record(ProtocolEvent::Decided { txn, outcome });
        }
        fixed
    }

    fn multicast_decision(&mut self, ctx: &mut dyn Context, txn: TxnId, outcome: Outcome) {
        for partition in self.topology.partitions() {
            ctx.send(
                partition,
                Message::Decision {
                    txn,
                    commit: outcome.is_commit(),
                },
            );
        }
    }

    /// Decide, tell every partition, then tell the client unless we crash first.
    fn decide(&mut self, ctx: &mut dyn Context, txn: TxnId, outcome: Outcome) {
        let outcome = self.fix_decision(ctx, txn, outcome);
        info!(coordinator = self.index, txn = %txn, %outcome, "decided");
        self.multicast_decision(ctx, txn, outcome);
        if self.maybe_crash(ctx) {
            return;
        }
        self.finish(ctx, txn, outcome);
    }

    /// Deliver the result, clear the record and start an audit.
    fn finish(&mut self, ctx: &mut dyn Context, txn: TxnId, outcome: Outcome) {
        let Some(record) = self.records.remove(&txn) else {
            return;
        };
        if self.client_txns.get(&record.client) == Some(&txn) {
            self.client_txns.remove(&record.client);
        }
        ctx.send(
            record.client,
            Message::TxnResult {
                txn,
                commit: outcome.is_commit(),
            },
        );
        self.start_audit(ctx, txn);
    }

    // =========================================================================
    // Consistency audit
    // =========================================================================

    fn start_audit(&mut self, ctx: &mut dyn Context, txn: TxnId) {
        self.audits.insert(txn, BTreeMap::new());
        for partition in self.topology.partitions() {
            ctx.send(partition, Message::CheckConsistentRequest { txn });
        }
    }

    fn handle_audit_response(&mut self, ctx: &mut dyn Context, from: ProcessId, txn: TxnId, sum: Value) {
        let ProcessId::Partition(partition) = from else {
            return;
        };
        let Some(sums) = self.audits.get_mut(&txn) else {
            debug!(coordinator = self.index, txn = %txn, "sum for an abandoned audit");
            return;
        };
        sums.insert(partition, sum);
        if sums.len() < self.topology.partition_count() as usize {
            return;
        }
        let total: Value = sums.values().sum();
        self.audits.remove(&txn);
        let expected = self.config.expected_total();
        if total == expected {
            info!(coordinator = self.index, txn = %txn, total, "consistency check complete");
        } else {
            // Commits still being applied elsewhere can skew a single audit.
            warn!(coordinator = self.index, txn = %txn, total, expected, "consistency check mismatch");
        }
        ctx.record(ProtocolEvent::AuditCompleted { txn, total });
    }
}

impl Recoverable for Coordinator {
    fn crash_recovery(&self) -> &CrashRecovery {
        &self.crash
    }

    fn crash_recovery_mut(&mut self) -> &mut CrashRecovery {
        &mut self.crash
    }

    fn on_recovery(&mut self, ctx: &mut dyn Context) {
        if !self.audits.is_empty() {
            debug!(coordinator = self.index, abandoned = self.audits.len(), "dropping audits interrupted by the crash");
            self.audits.clear();
        }
        let live: Vec<TxnId> = self.records.keys().copied().collect();
        assert_sometimes!(!live.is_empty(), "coordinator recovers with live transactions");
        for txn in &live {
            let outcome = self.fix_decision(ctx, *txn, Outcome::Abort);
            info!(coordinator = self.index, txn = %txn, %outcome, "finishing after recovery");
        }
        for txn in live {
            let Some(outcome) = self.history.get(&txn).copied() else {
                continue;
            };
            self.finish(ctx, txn, outcome);
        }
        let decided: Vec<(TxnId, Outcome)> = self.history.iter().map(|(t, o)| (*t, *o)).collect();
        for (txn, outcome) in decided {
            self.multicast_decision(ctx, txn, outcome);
        }
    }
}

impl Process for Coordinator {
    fn id(&self) -> ProcessId {
        self.me()
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ProcessId, message: Message) {
        let Some(message) = self.screen(ctx, message) else {
            return;
        };
        match message {
            Message::TxnBegin { client_id } => self.handle_begin(ctx, from, client_id),
            Message::Read { client_id, key, .. } => self.handle_read(ctx, from, client_id, key),
            Message::ReadResult {
                client_id,
                key,
                value,
                txn,
            } => self.handle_read_result(ctx, client_id, key, value, txn),
            Message::Write {
                client_id,
                key,
                value,
                ..
            } => self.handle_write(ctx, from, client_id, key, value),
            Message::TxnEnd { client_id, commit } => self.handle_end(ctx, from, client_id, commit),
            Message::VoteResponse { txn, commit } => self.handle_vote(ctx, from, txn, commit),
            Message::Timeout { txn, .. } => self.handle_vote_timeout(ctx, txn),
            Message::DecisionRequest { txn } => self.handle_decision_request(ctx, from, txn),
            Message::CheckConsistentResponse { txn, sum } => {
                self.handle_audit_response(ctx, from, txn, sum)
            }
            other => {
                warn!(coordinator = self.index, kind = other.kind(), from = %from, "unexpected message");
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingContext;
    use std::time::Duration;

    const CLIENT: ProcessId = ProcessId::Client(0);
    const P0: ProcessId = ProcessId::Partition(0);
    const P1: ProcessId = ProcessId::Partition(1);

    fn make_coordinator() -> (Coordinator, RecordingContext) {
        let config = TxnConfig {
            coordinators: 1,
            partitions: 2,
            clients: 1,
            ..TxnConfig::default()
        };
        let topology = Topology::from_config(&config);
        (
            Coordinator::new(0, topology, config),
            RecordingContext::new(ProcessId::Coordinator(0)),
        )
    }

    fn begin(c: &mut Coordinator, ctx: &mut RecordingContext, client: ProcessId) -> TxnId {
        c.on_message(ctx, client, Message::TxnBegin { client_id: 0 });
        assert_eq!(ctx.sent.pop(), Some((client, Message::TxnAccept)));
        c.client_txns[&client]
    }

    fn request_votes(c: &mut Coordinator, ctx: &mut RecordingContext) {
        c.on_message(ctx, CLIENT, Message::TxnEnd { client_id: 0, commit: true });
    }

    fn result_for_client(ctx: &RecordingContext) -> Option<bool> {
        ctx.sent_to(CLIENT).into_iter().find_map(|m| match m {
            Message::TxnResult { commit, .. } => Some(commit),
            _ => None,
        })
    }

    fn decisions_to(ctx: &RecordingContext, to: ProcessId) -> Vec<(TxnId, bool)> {
        ctx.sent_to(to)
            .into_iter()
            .filter_map(|m| match m {
                Message::Decision { txn, commit } => Some((txn, commit)),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // Routing
    // =========================================================================

    #[test]
    fn test_begin_allocates_increasing_ids() {
        let (mut c, mut ctx) = make_coordinator();
        let first = begin(&mut c, &mut ctx, CLIENT);
        let second = begin(&mut c, &mut ctx, ProcessId::Client(1));
        assert_eq!(first, TxnId::new(0, 0));
        assert_eq!(second, TxnId::new(0, 1));
        assert_eq!(c.live_transactions(), 2);
    }

    #[test]
    fn test_operations_are_routed_by_key() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        c.on_message(&mut ctx, CLIENT, Message::Read { client_id: 0, key: 3, txn: None });
        c.on_message(&mut ctx, CLIENT, Message::Write { client_id: 0, key: 14, value: 7, txn: None });
        assert_eq!(
            ctx.take_sent(),
            vec![
                (P0, Message::Read { client_id: 0, key: 3, txn: Some(txn) }),
                (P1, Message::Write { client_id: 0, key: 14, value: 7, txn: Some(txn) }),
            ]
        );
    }

    #[test]
    fn test_read_result_is_relayed_to_client() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        let result = Message::ReadResult { client_id: 0, key: 3, value: 100, txn };
        c.on_message(&mut ctx, P0, result.clone());
        assert_eq!(ctx.sent_to(CLIENT), vec![result]);
    }

    #[test]
    fn test_operations_without_transaction_are_dropped() {
        let (mut c, mut ctx) = make_coordinator();
        c.on_message(&mut ctx, CLIENT, Message::Read { client_id: 0, key: 3, txn: None });
        c.on_message(&mut ctx, CLIENT, Message::TxnEnd { client_id: 0, commit: true });
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn test_out_of_range_key_is_dropped() {
        let (mut c, mut ctx) = make_coordinator();
        begin(&mut c, &mut ctx, CLIENT);
        c.on_message(&mut ctx, CLIENT, Message::Read { client_id: 0, key: 20, txn: None });
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn test_rebegin_silently_aborts_previous_transaction() {
        let (mut c, mut ctx) = make_coordinator();
        let old = begin(&mut c, &mut ctx, CLIENT);
        let new = begin(&mut c, &mut ctx, CLIENT);
        assert_ne!(old, new);
        assert_eq!(c.decision(old), Some(Outcome::Abort));
        assert_eq!(decisions_to(&ctx, P0), vec![(old, false)]);
        assert_eq!(result_for_client(&ctx), None);
        assert_eq!(c.live_transactions(), 1);
    }

    // =========================================================================
    // Two-phase commit
    // =========================================================================

    #[test]
    fn test_client_abort_skips_voting() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        c.on_message(&mut ctx, CLIENT, Message::TxnEnd { client_id: 0, commit: false });
        assert_eq!(c.decision(txn), Some(Outcome::Abort));
        assert!(ctx.sent_to(P0).iter().all(|m| !matches!(m, Message::VoteRequest { .. })));
        assert_eq!(decisions_to(&ctx, P1), vec![(txn, false)]);
        assert_eq!(result_for_client(&ctx), Some(false));
        assert_eq!(c.live_transactions(), 0);
    }

    #[test]
    fn test_all_yes_commits() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        assert_eq!(c.phase(txn), Some(TxnPhase::Voting));
        assert_eq!(ctx.sent_to(P0), vec![Message::VoteRequest { txn }]);
        assert_eq!(ctx.sent_to(P1), vec![Message::VoteRequest { txn }]);

        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: true });
        assert_eq!(c.decision(txn), None);
        c.on_message(&mut ctx, P1, Message::VoteResponse { txn, commit: true });

        assert_eq!(c.decision(txn), Some(Outcome::Commit));
        assert_eq!(decisions_to(&ctx, P0), vec![(txn, true)]);
        assert_eq!(decisions_to(&ctx, P1), vec![(txn, true)]);
        assert_eq!(result_for_client(&ctx), Some(true));
        assert!(ctx.pending_timers().is_empty(), "vote timer must be cancelled");
        assert_eq!(ctx.events, vec![ProtocolEvent::Decided { txn, outcome: Outcome::Commit }]);
    }

    #[test]
    fn test_duplicate_yes_votes_count_once() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: true });
        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: true });
        assert_eq!(c.decision(txn), None);
    }

    #[test]
    fn test_single_no_aborts() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: true });
        c.on_message(&mut ctx, P1, Message::VoteResponse { txn, commit: false });
        assert_eq!(c.decision(txn), Some(Outcome::Abort));
        assert_eq!(result_for_client(&ctx), Some(false));
    }

    #[test]
    fn test_vote_timeout_aborts() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        let timers = ctx.pending_timers();
        assert_eq!(timers.len(), 1);
        let (_, timeout) = timers[0].clone();
        assert_eq!(timeout, Message::Timeout { txn, participant: None });

        c.on_message(&mut ctx, ProcessId::Coordinator(0), timeout);
        assert_eq!(c.decision(txn), Some(Outcome::Abort));
        assert_eq!(result_for_client(&ctx), Some(false));
    }

    #[test]
    fn test_votes_after_decision_are_ignored() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: false });
        ctx.take_sent();
        c.on_message(&mut ctx, P1, Message::VoteResponse { txn, commit: true });
        assert!(ctx.sent.is_empty());
        assert_eq!(c.decision(txn), Some(Outcome::Abort));
    }

    #[test]
    fn test_decision_request_answered_from_history() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        c.on_message(&mut ctx, P0, Message::DecisionRequest { txn });
        assert!(ctx.sent_to(P0).is_empty(), "undecided transactions are not answered");

        c.on_message(&mut ctx, CLIENT, Message::TxnEnd { client_id: 0, commit: false });
        ctx.take_sent();
        c.on_message(&mut ctx, P1, Message::DecisionRequest { txn });
        assert_eq!(ctx.sent_to(P1), vec![Message::Decision { txn, commit: false }]);
    }

    // =========================================================================
    // Audit
    // =========================================================================

    #[test]
    fn test_audit_follows_result() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        c.on_message(&mut ctx, CLIENT, Message::TxnEnd { client_id: 0, commit: false });
        assert!(ctx.sent_to(P0).contains(&Message::CheckConsistentRequest { txn }));
        assert_eq!(c.pending_audits(), 1);

        c.on_message(&mut ctx, P0, Message::CheckConsistentResponse { txn, sum: 1000 });
        assert_eq!(c.pending_audits(), 1);
        c.on_message(&mut ctx, P1, Message::CheckConsistentResponse { txn, sum: 1000 });
        assert_eq!(c.pending_audits(), 0);
        assert!(ctx
            .events
            .contains(&ProtocolEvent::AuditCompleted { txn, total: 2000 }));
    }

    // =========================================================================
    // Crash and recovery
    // =========================================================================

    #[test]
    fn test_crash_after_vote_request_aborts_on_recovery() {
        let (mut c, mut ctx) = make_coordinator();
        c.config.coordinator_crash_probability = 1.0;
        ctx.coin = 0.0;
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        assert!(c.is_crashed());

        // Votes and the client are ignored while down.
        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: true });
        c.on_message(&mut ctx, P1, Message::VoteResponse { txn, commit: true });
        assert_eq!(c.decision(txn), None);

        c.config.coordinator_crash_probability = 0.0;
        ctx.take_sent();
        c.on_message(&mut ctx, ProcessId::Coordinator(0), Message::Recovery);
        assert!(!c.is_crashed());
        assert_eq!(c.decision(txn), Some(Outcome::Abort));
        assert!(decisions_to(&ctx, P0).contains(&(txn, false)));
        assert_eq!(result_for_client(&ctx), Some(false));
        assert_eq!(c.live_transactions(), 0);
    }

    #[test]
    fn test_crash_after_decision_keeps_outcome() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        request_votes(&mut c, &mut ctx);
        c.on_message(&mut ctx, P0, Message::VoteResponse { txn, commit: true });
        c.config.coordinator_crash_probability = 1.0;
        ctx.coin = 0.0;
        c.on_message(&mut ctx, P1, Message::VoteResponse { txn, commit: true });
        assert!(c.is_crashed());
        assert_eq!(result_for_client(&ctx), None);

        c.config.coordinator_crash_probability = 0.0;
        ctx.take_sent();
        c.on_message(&mut ctx, ProcessId::Coordinator(0), Message::Recovery);
        assert_eq!(c.decision(txn), Some(Outcome::Commit));
        assert_eq!(result_for_client(&ctx), Some(true));
        assert!(decisions_to(&ctx, P1).contains(&(txn, true)));
    }

    #[test]
    fn test_recovery_remulticasts_history() {
        let (mut c, mut ctx) = make_coordinator();
        let txn = begin(&mut c, &mut ctx, CLIENT);
        c.on_message(&mut ctx, CLIENT, Message::TxnEnd { client_id: 0, commit: false });
        c.crash(&mut ctx, Duration::from_secs(1));
        ctx.take_sent();
        c.on_message(&mut ctx, ProcessId::Coordinator(0), Message::Recovery);
        assert_eq!(decisions_to(&ctx, P0), vec![(txn, false)]);
        assert_eq!(decisions_to(&ctx, P1), vec![(txn, false)]);
        assert_eq!(c.pending_audits(), 0);
    }
}
