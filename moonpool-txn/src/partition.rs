//! Partition: a shard of the store and a 2PC participant.
//!
//! A partition owns a contiguous key range. Transactions read and write
//! into private per-transaction workspaces; nothing reaches the committed
//! store until a COMMIT decision is applied.
//!
//! ## Per-transaction lifecycle
//!
//! ```text
//! UNTOUCHED ──Read/Write──► IN-WORKSPACE ──VoteRequest──► VALIDATING
//!                                                           │
//!                          ┌────────────────────────────────┤
//!                          ▼                                ▼
//!                   VOTED-YES-LOCKED                    VOTED-NO
//!                          │ Decision / DecisionRequest reply │
//!                          ▼                                ▼
//!                       DECIDED ─────────────────────► CLEARED
//! ```
//!
//! ## Validation
//!
//! On `VoteRequest` the partition takes the validation lock of every row in
//! the workspace (any lock held by another transaction means NO), then
//! compares each snapshotted version with the committed one (any mismatch
//! means NO). Locks are held from a YES vote until the decision arrives,
//! which is what makes the first validator win between two conflicting
//! transactions. A commit installs every workspace row one version past
//! the committed one, rows that were only read included, so a later
//! transaction holding the older snapshot of such a row votes NO.
//!
//! ## Termination protocol
//!
//! After voting YES a partition arms a decision timeout. If it fires while
//! the transaction is still undecided, the partition asks every peer
//! partition and every coordinator for the outcome and re-arms. Any process
//! that knows a terminal outcome answers with a `Decision`.
//!
//! ## Crashes
//!
//! A partition may crash right after voting. While crashed it still serves
//! `Read`, `Write` and `CheckConsistentRequest`, which only touch workspaces
//! or read committed state. On recovery it asks the coordinators about every
//! undecided transaction, and about every workspace whose vote request was
//! dropped while crashed.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::assert_always;
use crate::assert_sometimes;
use crate::config::TxnConfig;
use crate::crash::{CrashRecovery, Recoverable};
use crate::history::ProtocolEvent;
use crate::message::Message;
use crate::process::{Context, Process, TimerHandle};
use crate::topology::Topology;
use crate::types::{Key, Outcome, ProcessId, TxnId, Value, VersionedValue};

/// Why a partition voted NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// A row's validation lock is held by another transaction.
    Locked {
        /// Contended key.
        key: Key,
        /// Transaction holding the lock.
        holder: TxnId,
    },
    /// A row was committed since the transaction snapshotted it.
    StaleVersion {
        /// Key that changed.
        key: Key,
        /// Version in the workspace.
        seen: u64,
        /// Current committed version.
        current: u64,
    },
}


/// A shard of the store.
pub struct Partition {
    index: u32,
    topology: Topology,
    config: TxnConfig,
    /// Committed rows, indexed by row offset.
    store: Vec<VersionedValue>,
    /// Private workspaces of in-flight transactions: per key, the version
    /// seen at first access and the value the transaction would commit.
    workspaces: BTreeMap<TxnId, BTreeMap<Key, VersionedValue>>,
    /// Validation lock per row offset, with its holder.
    locks: Vec<Option<TxnId>>,
    /// `None` while in doubt, `Some` once terminal.
    decisions: BTreeMap<TxnId, Option<Outcome>>,
    /// Pending decision timeouts.
    decision_timers: BTreeMap<TxnId, TimerHandle>,
    crash: CrashRecovery,
}

impl Partition {
    /// Create partition `index` with every row at version 0 and the configured initial value.
    pub fn new(index: u32, topology: Topology, config: TxnConfig) -> Self {
        let rows = topology.keys_per_partition() as usize;
        Self {
            index,
            topology,
            store: vec![VersionedValue::new(0, config.initial_value); rows],
            locks: vec![None; rows],
            config,
            workspaces: BTreeMap::new(),
            decisions: BTreeMap::new(),
            decision_timers: BTreeMap::new(),
            crash: CrashRecovery::new(),
        }
    }

    /// Index of this partition.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Committed row for `key`, if this partition owns it.
    pub fn committed(&self, key: Key) -> Option<VersionedValue> {
        self.row(key).map(|row| self.store[row])
    }

    /// Sum of committed values.
    pub fn sum(&self) -> Value {
        self.store.iter().map(|r| r.value).sum()
    }

    /// Sum of committed values before any commit.
    pub fn initial_sum(&self) -> Value {
        self.store.len() as Value * self.config.initial_value
    }

    /// Tentative row of `txn` for `key`, if the transaction touched it here.
    pub fn workspace_value(&self, txn: TxnId, key: Key) -> Option<VersionedValue> {
        self.workspaces
            .get(&txn)
            .and_then(|ws| ws.get(&key))
            .copied()
    }

    /// Number of transactions with a live workspace.
    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    /// Number of rows whose validation lock is held.
    pub fn held_locks(&self) -> usize {
        self.locks.iter().filter(|l| l.is_some()).count()
    }

    /// Local knowledge about `txn`: `None` if never voted on, `Some(None)` if in doubt.
    pub fn decision(&self, txn: TxnId) -> Option<Option<Outcome>> {
        self.decisions.get(&txn).copied()
    }

    /// Transactions this partition voted YES on and is still in doubt about.
    pub fn undecided(&self) -> Vec<TxnId> {
        self.decisions
            .iter()
            .filter(|(_, d)| d.is_none())
            .map(|(t, _)| *t)
            .collect()
    }

    /// Transactions with a workspace here but no vote request ever handled,
    /// typically because the vote request arrived while crashed.
    pub fn unvoted(&self) -> Vec<TxnId> {
        self.workspaces
            .keys()
            .filter(|txn| !self.decisions.contains_key(txn))
            .copied()
            .collect()
    }

    /// Whether the partition is crashed.
    pub fn is_crashed(&self) -> bool {
        self.crash.is_crashed()
    }

    fn row(&self, key: Key) -> Option<usize> {
        (self.topology.partition_of(key) == Some(self.index)).then(|| self.topology.row_of(key))
    }

    fn me(&self) -> ProcessId {
        ProcessId::Partition(self.index)
    }

    /// Reads and writes are only accepted before the vote phase starts.
    fn accepts_operations(&self, txn: TxnId) -> bool {
        !self.decisions.contains_key(&txn)
    }

    /// Voted and waiting for the outcome, or holding a workspace whose vote
    /// request was lost.
    fn awaits_decision(&self, txn: TxnId) -> bool {
        match self.decisions.get(&txn) {
            Some(known) => known.is_none(),
            None => self.workspaces.contains_key(&txn),
        }
    }

    // =========================================================================
    // Workspace operations
    // =========================================================================

    fn handle_read(&mut self, ctx: &mut dyn Context, from: ProcessId, client_id: u32, key: Key, txn: Option<TxnId>) {
        let Some(txn) = txn else {
            warn!(partition = self.index, key, "read without transaction id");
            return;
        };
        if !self.accepts_operations(txn) {
            debug!(partition = self.index, txn = %txn, key, "ignoring read after vote");
            return;
        }
        let Some(row) = self.row(key) else {
            warn!(partition = self.index, txn = %txn, key, "read of a key this partition does not own");
            return;
        };
        let committed = self.store[row];
        let entry = *self
            .workspaces
            .entry(txn)
            .or_default()
            .entry(key)
            .or_insert(committed);
        debug!(partition = self.index, txn = %txn, key, value = entry.value, "read");
        ctx.send(
            from,
            Message::ReadResult {
                client_id,
                key,
                value: entry.value,
                txn,
            },
        );
    }

    fn handle_write(&mut self, key: Key, value: Value, txn: Option<TxnId>) {
        let Some(txn) = txn else {
            warn!(partition = self.index, key, "write without transaction id");
            return;
        };
        if !self.accepts_operations(txn) {
            debug!(partition = self.index, txn = %txn, key, "ignoring write after vote");
            return;
        }
        let Some(row) = self.row(key) else {
            warn!(partition = self.index, txn = %txn, key, "write to a key this partition does not own");
            return;
        };
        let committed = self.store[row];
        let entry = self
            .workspaces
            .entry(txn)
            .or_default()
            .entry(key)
            .or_insert(committed);
        entry.value = value;
        debug!(partition = self.index, txn = %txn, key, value, "write");
    }

    // =========================================================================
    // Voting
    // =========================================================================

    /// Check locks then versions for `txn`'s workspace; take every lock on success.
    fn validate(&mut self, txn: TxnId) -> Result<(), Conflict> {
        let Some(workspace) = self.workspaces.get(&txn) else {
            return Ok(());
        };
        let rows: Vec<(Key, usize, VersionedValue)> = workspace
            .iter()
            .filter_map(|(key, seen)| self.row(*key).map(|row| (*key, row, *seen)))
            .collect();

        for (key, row, _) in &rows {
            if let Some(holder) = self.locks[*row] {
                if holder != txn {
                    return Err(Conflict::Locked { key: *key, holder });
                }
            }
        }
        for (_, row, _) in &rows {
            self.locks[*row] = Some(txn);
        }
        for (key, row, seen) in &rows {
            let current = self.store[*row].version;
            if seen.version != current {
                return Err(Conflict::StaleVersion {
                    key: *key,
                    seen: seen.version,
                    current,
                });
            }
        }
        Ok(())
    }

    fn handle_vote_request(&mut self, ctx: &mut dyn Context, from: ProcessId, txn: TxnId) {
        if let Some(known) = self.decisions.get(&txn).copied() {
            // Already voted: answer consistently with what we did.
            let commit = known != Some(Outcome::Abort);
            debug!(partition = self.index, txn = %txn, commit, "repeating vote");
            ctx.send(from, Message::VoteResponse { txn, commit });
            return;
        }

        self.decisions.insert(txn, None);
        let validation = self.validate(txn);
        assert_sometimes!(validation.is_err(), "partition votes no on a conflict");

        match validation {
            Ok(()) => {
                info!(partition = self.index, txn = %txn, "vote YES");
                ctx.record(ProtocolEvent::Voted { txn, commit: true });
                ctx.send(from, Message::VoteResponse { txn, commit: true });
                self.arm_decision_timer(ctx, txn);
            }
            Err(conflict) => {
                info!(partition = self.index, txn = %txn, ?conflict, "vote NO");
                ctx.record(ProtocolEvent::Voted { txn, commit: false });
                ctx.send(from, Message::VoteResponse { txn, commit: false });
                // A NO vote forces a global abort: settle it locally right away.
                self.apply_decision(ctx, txn, Outcome::Abort);
            }
        }

        if ctx.random_f64() < self.config.partition_crash_probability {
            let recover_after = self.config.partition_recovery();
            self.crash(ctx, recover_after);
        }
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    fn handle_decision(&mut self, ctx: &mut dyn Context, txn: TxnId, commit: bool) {
        let outcome = Outcome::from_commit(commit);
        if let Some(Some(known)) = self.decisions.get(&txn).copied() {
            assert_always!(
                known == outcome,
                format!(
                    "partition {} received {} for {} after applying {}",
                    self.index, outcome, txn, known
                )
            );
            debug!(partition = self.index, txn = %txn, "duplicate decision");
            return;
        }
        assert_always!(
            self.decisions.contains_key(&txn) || !outcome.is_commit(),
            format!("partition {} told to commit {} without voting", self.index, txn)
        );
        self.apply_decision(ctx, txn, outcome);
    }

    /// Apply `outcome` for `txn`: on commit every workspace row is installed
    /// one version past the committed one, read-only rows included. Then
    /// release locks, drop the workspace and remember the outcome.
    fn apply_decision(&mut self, ctx: &mut dyn Context, txn: TxnId, outcome: Outcome) {
        let workspace = self.workspaces.remove(&txn).unwrap_or_default();
        let mut installed = 0;
        if outcome.is_commit() {
            for (key, tentative) in &workspace {
                let Some(row) = self.row(*key) else { continue };
                self.store[row] = self.store[row].next(tentative.value);
                installed += 1;
            }
        }
        for lock in self.locks.iter_mut() {
            if *lock == Some(txn) {
                *lock = None;
            }
        }
        self.decisions.insert(txn, Some(outcome));
        if let Some(timer) = self.decision_timers.remove(&txn) {
            ctx.cancel(timer);
        }
        ctx.record(ProtocolEvent::Applied {
            txn,
            outcome,
            installed,
        });
        info!(partition = self.index, txn = %txn, %outcome, rows = workspace.len(), "applied decision");
    }

    fn handle_decision_request(&mut self, ctx: &mut dyn Context, from: ProcessId, txn: TxnId) {
        if let Some(Some(outcome)) = self.decisions.get(&txn).copied() {
            debug!(partition = self.index, txn = %txn, to = %from, "answering decision request");
            ctx.send(
                from,
                Message::Decision {
                    txn,
                    commit: outcome.is_commit(),
                },
            );
        }
    }

    // =========================================================================
    // Termination protocol
    // =========================================================================

    fn arm_decision_timer(&mut self, ctx: &mut dyn Context, txn: TxnId) {
        let timer = ctx.schedule(
            self.config.decision_timeout(),
            Message::Timeout {
                txn,
                participant: Some(self.me()),
            },
        );
        if let Some(previous) = self.decision_timers.insert(txn, timer) {
            ctx.cancel(previous);
        }
    }

    fn handle_decision_timeout(&mut self, ctx: &mut dyn Context, txn: TxnId) {
        self.decision_timers.remove(&txn);
        if !self.awaits_decision(txn) {
            return;
        }
        info!(partition = self.index, txn = %txn, "decision timeout, asking peers and coordinators");
        for peer in self.topology.partitions().filter(|p| *p != self.me()) {
            ctx.send(peer, Message::DecisionRequest { txn });
        }
        for coordinator in self.topology.coordinators() {
            ctx.send(coordinator, Message::DecisionRequest { txn });
        }
        self.arm_decision_timer(ctx, txn);
    }
}

impl Recoverable for Partition {
    fn crash_recovery(&self) -> &CrashRecovery {
        &self.crash
    }

    fn crash_recovery_mut(&mut self) -> &mut CrashRecovery {
        &mut self.crash
    }

    fn admits_while_crashed(&self, message: &Message) -> bool {
        matches!(
            message,
            Message::Read { .. } | Message::Write { .. } | Message::CheckConsistentRequest { .. }
        )
    }

    fn on_recovery(&mut self, ctx: &mut dyn Context) {
        let undecided = self.undecided();
        let unvoted = self.unvoted();
        assert_sometimes!(!undecided.is_empty(), "partition recovers in doubt");
        assert_sometimes!(!unvoted.is_empty(), "partition recovers with an unvoted workspace");
        let pending: BTreeSet<TxnId> = undecided.into_iter().chain(unvoted).collect();
        for txn in pending {
            for coordinator in self.topology.coordinators() {
                ctx.send(coordinator, Message::DecisionRequest { txn });
            }
            self.arm_decision_timer(ctx, txn);
        }
    }
}

impl Process for Partition {
    fn id(&self) -> ProcessId {
        self.me()
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ProcessId, message: Message) {
        let Some(message) = self.screen(ctx, message) else {
            return;
        };
        match message {
            Message::Read { client_id, key, txn } => self.handle_read(ctx, from, client_id, key, txn),
            Message::Write { key, value, txn, .. } => self.handle_write(key, value, txn),
            Message::VoteRequest { txn } => self.handle_vote_request(ctx, from, txn),
            Message::Decision { txn, commit } => self.handle_decision(ctx, txn, commit),
            Message::DecisionRequest { txn } => self.handle_decision_request(ctx, from, txn),
            Message::Timeout { txn, .. } => self.handle_decision_timeout(ctx, txn),
            Message::CheckConsistentRequest { txn } => {
                ctx.send(from, Message::CheckConsistentResponse { txn, sum: self.sum() });
            }
            other => {
                warn!(partition = self.index, kind = other.kind(), from = %from, "unexpected message");
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
