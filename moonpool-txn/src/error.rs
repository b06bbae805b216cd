//! Error types for cluster wiring, configuration and runtimes.
//!
//! Protocol outcomes (conflicts, timeouts, crashes) are never errors: they
//! surface as votes and decisions. [`TxnError`] covers the infrastructure
//! around the protocol.

use std::time::Duration;

use thiserror::Error;

use crate::types::ProcessId;

/// Errors raised while configuring or running a cluster.
#[derive(Debug, Error)]
pub enum TxnError {
    /// The configuration cannot describe a working cluster.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two processes were registered under the same id.
    #[error("process {0} is already registered")]
    DuplicateProcess(ProcessId),

    /// A process id was referenced but never registered.
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    /// The simulation still had pending events when it hit its time limit.
    #[error("simulation did not quiesce within {limit:?} of simulated time ({pending} events pending)")]
    TimeLimitExceeded {
        /// The simulated-time limit.
        limit: Duration,
        /// Events left in the queue.
        pending: usize,
    },

    /// The simulation processed more events than allowed.
    #[error("simulation exceeded its budget of {0} events")]
    EventBudgetExceeded(u64),

    /// The tokio cluster did not finish its workload in time.
    #[error("cluster did not finish its workload within {0:?}")]
    DeadlineExceeded(Duration),

    /// A process task panicked or was cancelled.
    #[error("process task failed: {0}")]
    TaskFailed(String),

    /// I/O error, typically while reading a configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A type alias for `Result<T, TxnError>`.
pub type Result<T> = std::result::Result<T, TxnError>;
