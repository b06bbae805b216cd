//! Wire messages exchanged between clients, coordinators and partitions.
//!
//! Every variant is serde-serializable: the fields listed here are exactly
//! what survives a send. Timers are ordinary messages a process schedules
//! to itself.
//!
//! | Message | Direction |
//! |---|---|
//! | `TxnBegin` / `TxnEnd` / `Read` / `Write` | client → coordinator |
//! | `TxnAccept` / `ReadResult` / `TxnResult` | coordinator → client |
//! | `Read` / `Write` / `VoteRequest` / `Decision` / `CheckConsistentRequest` | coordinator → partition |
//! | `ReadResult` / `VoteResponse` / `CheckConsistentResponse` | partition → coordinator |
//! | `DecisionRequest` / `Decision` | partition ↔ partition, partition → coordinator |
//! | `Timeout` / `Recovery` / `ClientTimer` | self-scheduled |

use serde::{Deserialize, Serialize};

use crate::types::{Key, ProcessId, TxnId, Value};

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Client asks a coordinator to open a transaction.
    TxnBegin {
        /// Client issuing the request.
        client_id: u32,
    },
    /// Coordinator acknowledges `TxnBegin`.
    TxnAccept,
    /// Read a key. `txn` is attached by the coordinator when forwarding.
    Read {
        /// Client issuing the read.
        client_id: u32,
        /// Key to read.
        key: Key,
        /// Transaction the read belongs to.
        txn: Option<TxnId>,
    },
    /// Result of a read, relayed back to the client by the coordinator.
    ReadResult {
        /// Client that issued the read.
        client_id: u32,
        /// Key that was read.
        key: Key,
        /// Value visible to the transaction.
        value: Value,
        /// Transaction the read belongs to.
        txn: TxnId,
    },
    /// Write a key. `txn` is attached by the coordinator when forwarding.
    Write {
        /// Client issuing the write.
        client_id: u32,
        /// Key to write.
        key: Key,
        /// New value.
        value: Value,
        /// Transaction the write belongs to.
        txn: Option<TxnId>,
    },
    /// Client ends its transaction, asking for commit or abort.
    TxnEnd {
        /// Client ending its transaction.
        client_id: u32,
        /// `true` to attempt a commit, `false` to abort.
        commit: bool,
    },
    /// Coordinator asks a partition to validate and vote.
    VoteRequest {
        /// Transaction to vote on.
        txn: TxnId,
    },
    /// Partition's vote.
    VoteResponse {
        /// Transaction voted on.
        txn: TxnId,
        /// `true` for YES.
        commit: bool,
    },
    /// Final decision of a transaction.
    Decision {
        /// Decided transaction.
        txn: TxnId,
        /// `true` for commit.
        commit: bool,
    },
    /// Coordinator reports the outcome to the client.
    TxnResult {
        /// Finished transaction.
        txn: TxnId,
        /// `true` if the transaction committed.
        commit: bool,
    },
    /// An uncertain partition asks for the outcome of a transaction.
    DecisionRequest {
        /// Transaction in doubt.
        txn: TxnId,
    },
    /// Vote timeout (coordinator) or decision timeout (partition).
    Timeout {
        /// Transaction the timer guards.
        txn: TxnId,
        /// Participant the timer concerns, if any.
        participant: Option<ProcessId>,
    },
    /// End of a simulated crash.
    Recovery,
    /// Coordinator asks a partition for the sum of its committed values.
    CheckConsistentRequest {
        /// Transaction whose completion triggered the audit.
        txn: TxnId,
    },
    /// Partition's committed sum.
    CheckConsistentResponse {
        /// Audit the sum belongs to.
        txn: TxnId,
        /// Sum of committed values on the partition.
        sum: Value,
    },
    /// Client workload timers.
    ClientTimer(ClientTimer),
}

/// Self-scheduled ticks of the client workload driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientTimer {
    /// The coordinator did not accept `TxnBegin` in time.
    AcceptTimeout {
        /// Begin attempt the timer belongs to.
        attempt: u64,
    },
    /// Start the next transaction.
    NextTxn,
}

impl Message {
    /// Short variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::TxnBegin { .. } => "TxnBegin",
            Message::TxnAccept => "TxnAccept",
            Message::Read { .. } => "Read",
            Message::ReadResult { .. } => "ReadResult",
            Message::Write { .. } => "Write",
            Message::TxnEnd { .. } => "TxnEnd",
            Message::VoteRequest { .. } => "VoteRequest",
            Message::VoteResponse { .. } => "VoteResponse",
            Message::Decision { .. } => "Decision",
            Message::TxnResult { .. } => "TxnResult",
            Message::DecisionRequest { .. } => "DecisionRequest",
            Message::Timeout { .. } => "Timeout",
            Message::Recovery => "Recovery",
            Message::CheckConsistentRequest { .. } => "CheckConsistentRequest",
            Message::CheckConsistentResponse { .. } => "CheckConsistentResponse",
            Message::ClientTimer(_) => "ClientTimer",
        }
    }
}
