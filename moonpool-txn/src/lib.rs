//! # Moonpool Transactions
//!
//! Two-phase commit with optimistic concurrency control over a partitioned
//! key-value store, exercised under deterministic simulation with crash and
//! recovery of every server process.
//!
//! ## Architecture
//!
//! ```text
//!  Client ──TxnBegin/Read/Write/TxnEnd──► Coordinator ──Read/Write──► Partition
//!    ▲                                      │    ▲                      │   ▲
//!    └──────────TxnAccept/ReadResult────────┘    └──ReadResult/Vote─────┘   │
//!    └──────────TxnResult───────────────────┘         VoteRequest/Decision ─┘
//!                                                Partition ◄─DecisionRequest─► Partition
//! ```
//!
//! - [`Partition`]: owns a contiguous key range, buffers each transaction's
//!   reads and writes in a private workspace, validates at vote time and
//!   applies decisions.
//! - [`Coordinator`]: opens transactions, routes operations, runs 2PC and
//!   audits the committed sum after each transaction.
//! - [`Client`]: transfer workload that preserves the sum of all values.
//! - [`crash`]: the Running/Crashed substrate shared by coordinators and
//!   partitions.
//!
//! ## Runtimes
//!
//! Processes are plain state machines behind the [`Process`] trait and only
//! talk to the world through a [`Context`]. Two runtimes provide one:
//!
//! | Runtime | Time | Randomness | Use |
//! |---|---|---|---|
//! | [`SimWorld`] | logical, jumps between events | seeded ChaCha8 per run | chaos testing, seed replay |
//! | [`TokioCluster`] | tokio timers | seeded ChaCha8 stream per process | smoke runs on real tasks |
//!
//! ## Fault Injection
//!
//! | Mechanism | Default | What it tests |
//! |-----------|---------|---------------|
//! | Coordinator crash after multicast | 0% (5% in `chaos()`) | Recovery aborts, decision re-multicast |
//! | Partition crash after vote | 0% (10% in `chaos()`) | Termination protocol |
//! | Network latency | 1-10ms | Interleavings |
//! | Buggified delays | 25% of active sites | Timeouts racing with replies |
//!
//! ## Multi-Seed Testing
//!
//! ```ignore
//! use moonpool_txn::{SimulationBuilder, TxnConfig};
//!
//! let report = SimulationBuilder::new()
//!     .config(TxnConfig::chaos())
//!     .standard_invariants()
//!     .set_iterations(100)
//!     .run();
//! assert_eq!(report.failed_runs, 0, "seeds_failing={:?}", report.seeds_failing);
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod chaos;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod crash;
pub mod error;
pub mod history;
pub mod message;
pub mod partition;
pub mod process;
pub mod runner;
pub mod runtime;
pub mod sim;
pub mod topology;
pub mod types;

pub use chaos::{invariant_fn, standard_invariants, Invariant};
pub use client::Client;
pub use config::TxnConfig;
pub use coordinator::{Coordinator, TxnPhase};
pub use crash::{CrashRecovery, CrashState, Recoverable};
pub use error::{Result, TxnError};
pub use history::{History, HistoryEntry, ProtocolEvent};
pub use message::{ClientTimer, Message};
pub use partition::{Conflict, Partition};
pub use process::{Context, Process, TimerHandle};
pub use runner::{IterationControl, SimulationBuilder, SimulationMetrics, SimulationReport};
pub use runtime::{TokioCluster, TokioReport};
pub use sim::{NetworkConfiguration, SimWorld};
pub use topology::Topology;
pub use types::{Key, Outcome, ProcessId, TxnId, Value, Version, VersionedValue};
