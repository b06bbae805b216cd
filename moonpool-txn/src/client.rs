//! Client workload: random transfers between pairs of keys.
//!
//! Each transaction picks a coordinator at random, then performs a number of
//! operations. An operation reads two distinct random keys and, with
//! `write_probability`, moves a random amount from the first to the second.
//! The transaction then ends with commit (`commit_probability`) or abort.
//! Every committed transaction preserves the sum of all values.
//!
//! A `TxnBegin` that is not accepted within `accept_timeout_ms` is retried
//! at a freshly chosen coordinator. Accepts from coordinators the client
//! has moved away from are answered with an abort.

use std::any::Any;

use tracing::{debug, info};

use crate::config::TxnConfig;
use crate::history::ProtocolEvent;
use crate::message::{ClientTimer, Message};
use crate::process::{Context, Process, TimerHandle};
use crate::topology::Topology;
use crate::types::{Key, Outcome, ProcessId, TxnId, Value};

#[derive(Debug)]
struct Transfer {
    coordinator: ProcessId,
    attempt: u64,
    accepted: bool,
    accept_timer: Option<TimerHandle>,
    ops_total: u64,
    ops_done: u64,
    keys: Option<(Key, Key)>,
    first: Option<Value>,
    second: Option<Value>,
    ending: bool,
}

/// A workload client.
pub struct Client {
    index: u32,
    topology: Topology,
    config: TxnConfig,
    current: Option<Transfer>,
    attempts: u64,
    attempted: u64,
    committed: u64,
    finished: bool,
}

impl Client {
    /// Create client `index`.
    pub fn new(index: u32, topology: Topology, config: TxnConfig) -> Self {
        Self {
            index,
            topology,
            config,
            current: None,
            attempts: 0,
            attempted: 0,
            committed: 0,
            finished: false,
        }
    }

    /// Index of this client.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Transactions started so far.
    pub fn attempted(&self) -> u64 {
        self.attempted
    }

    /// Transactions that committed.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Whether the whole workload has run.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn me(&self) -> ProcessId {
        ProcessId::Client(self.index)
    }

    fn start_transaction(&mut self, ctx: &mut dyn Context) {
        self.attempted += 1;
        let spread = u64::from(self.config.max_txn_ops - self.config.min_txn_ops) + 1;
        let ops_total = u64::from(self.config.min_txn_ops) + ctx.random_below(spread);
        self.send_begin(ctx, ops_total);
    }

    fn send_begin(&mut self, ctx: &mut dyn Context, ops_total: u64) {
        self.attempts += 1;
        let attempt = self.attempts;
        let pick = ctx.random_below(u64::from(self.topology.coordinator_count()));
        let coordinator = ProcessId::Coordinator(pick as u32);
        debug!(client = self.index, %coordinator, attempt, ops_total, "begin");
        ctx.send(
            coordinator,
            Message::TxnBegin {
                client_id: self.index,
            },
        );
        let accept_timer = ctx.schedule(
            self.config.accept_timeout(),
            Message::ClientTimer(ClientTimer::AcceptTimeout { attempt }),
        );
        self.current = Some(Transfer {
            coordinator,
            attempt,
            accepted: false,
            accept_timer: Some(accept_timer),
            ops_total,
            ops_done: 0,
            keys: None,
            first: None,
            second: None,
            ending: false,
        });
    }

    fn handle_accept_timeout(&mut self, ctx: &mut dyn Context, attempt: u64) {
        let ops_total = match &self.current {
            Some(t) if t.attempt == attempt && !t.accepted => t.ops_total,
            _ => return,
        };
        info!(client = self.index, attempt, "begin not accepted, retrying");
        self.send_begin(ctx, ops_total);
    }

    fn handle_accept(&mut self, ctx: &mut dyn Context, from: ProcessId) {
        let transfer = match self.current.as_mut() {
            Some(transfer) if transfer.coordinator == from => transfer,
            _ => {
                debug!(client = self.index, %from, "accept from an abandoned coordinator");
                ctx.send(
                    from,
                    Message::TxnEnd {
                        client_id: self.index,
                        commit: false,
                    },
                );
                return;
            }
        };
        if transfer.accepted {
            return;
        }
        transfer.accepted = true;
        if let Some(timer) = transfer.accept_timer.take() {
            ctx.cancel(timer);
        }
        self.next_operation(ctx);
    }

    /// Read two fresh keys, or end once every operation ran.
    fn next_operation(&mut self, ctx: &mut dyn Context) {
        let total = u64::from(self.topology.total_keys());
        let commit_probability = self.config.commit_probability;
        let client_id = self.index;
        let Some(transfer) = self.current.as_mut() else {
            return;
        };
        if transfer.ops_done >= transfer.ops_total {
            let commit = ctx.random_f64() < commit_probability;
            transfer.ending = true;
            debug!(client = client_id, commit, ops = transfer.ops_done, "end");
            ctx.send(transfer.coordinator, Message::TxnEnd { client_id, commit });
            return;
        }
        let first = ctx.random_below(total) as Key;
        let second = ((u64::from(first) + 1 + ctx.random_below(total - 1)) % total) as Key;
        transfer.keys = Some((first, second));
        transfer.first = None;
        transfer.second = None;
        for key in [first, second] {
            ctx.send(
                transfer.coordinator,
                Message::Read {
                    client_id,
                    key,
                    txn: None,
                },
            );
        }
    }

    fn handle_read_result(&mut self, ctx: &mut dyn Context, from: ProcessId, key: Key, value: Value) {
        let write_probability = self.config.write_probability;
        let client_id = self.index;
        let Some(transfer) = self.current.as_mut() else {
            return;
        };
        if transfer.coordinator != from || !transfer.accepted || transfer.ending {
            return;
        }
        let Some((first, second)) = transfer.keys else {
            return;
        };
        if key == first && transfer.first.is_none() {
            transfer.first = Some(value);
        } else if key == second && transfer.second.is_none() {
            transfer.second = Some(value);
        } else {
            return;
        }
        let (Some(fv), Some(sv)) = (transfer.first, transfer.second) else {
            return;
        };

        if ctx.random_f64() < write_probability {
            let taken = if fv >= 1 {
                1 + ctx.random_below(fv as u64) as Value
            } else {
                0
            };
            for (key, value) in [(first, fv - taken), (second, sv + taken)] {
                ctx.send(
                    transfer.coordinator,
                    Message::Write {
                        client_id,
                        key,
                        value,
                        txn: None,
                    },
                );
            }
        }
        transfer.ops_done += 1;
        self.next_operation(ctx);
    }

    fn handle_result(&mut self, ctx: &mut dyn Context, from: ProcessId, txn: TxnId, commit: bool) {
        match &self.current {
            Some(t) if t.coordinator == from && t.accepted => {}
            _ => {
                debug!(client = self.index, txn = %txn, "result for an abandoned transaction");
                return;
            }
        }
        self.current = None;
        let outcome = Outcome::from_commit(commit);
        ctx.record(ProtocolEvent::ClientResult { txn, outcome });
        info!(client = self.index, txn = %txn, %outcome, "transaction finished");
        if commit {
            self.committed += 1;
        }
        if self.attempted < u64::from(self.config.txns_per_client) {
            ctx.schedule(self.config.think_time(), Message::ClientTimer(ClientTimer::NextTxn));
        } else {
            info!(
                client = self.index,
                attempted = self.attempted,
                committed = self.committed,
                "workload complete"
            );
            self.finished = true;
        }
    }
}

impl Process for Client {
    fn id(&self) -> ProcessId {
        self.me()
    }

    fn on_start(&mut self, ctx: &mut dyn Context) {
        if self.config.txns_per_client == 0 {
            self.finished = true;
            return;
        }
        self.start_transaction(ctx);
    }

    fn on_message(&mut self, ctx: &mut dyn Context, from: ProcessId, message: Message) {
        match message {
            Message::TxnAccept => self.handle_accept(ctx, from),
            Message::ReadResult { key, value, .. } => self.handle_read_result(ctx, from, key, value),
            Message::TxnResult { txn, commit } => self.handle_result(ctx, from, txn, commit),
            Message::ClientTimer(ClientTimer::AcceptTimeout { attempt }) => {
                self.handle_accept_timeout(ctx, attempt)
            }
            Message::ClientTimer(ClientTimer::NextTxn) => self.start_transaction(ctx),
            other => debug!(client = self.index, kind = other.kind(), "ignored"),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
