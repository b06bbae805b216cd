//! Tokio runtime: the same processes on real tasks and timers.
//!
//! Every process runs in its own task and owns an unbounded inbox.
//! Messages are delivered in send order per sender. Timers are spawned
//! sleeps that post their message back to the owner's inbox; cancelling
//! aborts the sleep task. Protocol events flow into a collector that stops
//! the cluster once every client has its results and a settle period has
//! passed, then audits the committed state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TxnConfig;
use crate::error::{Result, TxnError};
use crate::history::{History, HistoryEntry, ProtocolEvent};
use crate::message::Message;
use crate::partition::Partition;
use crate::process::{Context, Process, TimerHandle};
use crate::topology::Topology;
use crate::types::{Outcome, ProcessId, Value};

#[derive(Debug)]
struct Envelope {
    from: ProcessId,
    message: Message,
}

type Router = Arc<BTreeMap<ProcessId, UnboundedSender<Envelope>>>;

/// [`Context`] backed by tokio channels and timers.
struct TokioContext {
    me: ProcessId,
    epoch: Instant,
    router: Router,
    timers: HashMap<u64, JoinHandle<()>>,
    next_timer: u64,
    rng: ChaCha8Rng,
    events: UnboundedSender<HistoryEntry>,
}

impl TokioContext {
    fn new(
        me: ProcessId,
        seed: u64,
        epoch: Instant,
        router: Router,
        events: UnboundedSender<HistoryEntry>,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(rng_stream(me));
        Self {
            me,
            epoch,
            router,
            timers: HashMap::new(),
            next_timer: 0,
            rng,
            events,
        }
    }

    fn abort_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

/// Distinct RNG stream per process so every process draws independently.
fn rng_stream(id: ProcessId) -> u64 {
    let (kind, index) = match id {
        ProcessId::Coordinator(n) => (0u64, n),
        ProcessId::Partition(n) => (1, n),
        ProcessId::Client(n) => (2, n),
    };
    (kind << 32) | u64::from(index)
}

impl Context for TokioContext {
    fn me(&self) -> ProcessId {
        self.me
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn send(&mut self, to: ProcessId, message: Message) {
        let Some(inbox) = self.router.get(&to) else {
            warn!(from = %self.me, %to, kind = message.kind(), "message to unknown process dropped");
            return;
        };
        if inbox.send(Envelope { from: self.me, message }).is_err() {
            debug!(from = %self.me, %to, "receiver stopped, message dropped");
        }
    }

    fn schedule(&mut self, delay: Duration, message: Message) -> TimerHandle {
        self.timers.retain(|_, timer| !timer.is_finished());
        let handle = TimerHandle(self.next_timer);
        self.next_timer += 1;

        let me = self.me;
        let inbox = self.router.get(&me).cloned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inbox) = inbox {
                let _ = inbox.send(Envelope { from: me, message });
            }
        });
        self.timers.insert(handle.0, timer);
        handle
    }

    fn cancel(&mut self, timer: TimerHandle) {
        if let Some(timer) = self.timers.remove(&timer.0) {
            timer.abort();
        }
    }

    fn random_f64(&mut self) -> f64 {
        self.rng.random()
    }

    fn random_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.rng.random_range(0..n)
        }
    }

    fn record(&mut self, event: ProtocolEvent) {
        let entry = HistoryEntry {
            at: self.now(),
            process: self.me,
            event,
        };
        // The collector may already be gone during shutdown.
        let _ = self.events.send(entry);
    }
}

/// Drive one process until shutdown, then hand it back for inspection.
async fn drive(
    mut process: Box<dyn Process>,
    mut inbox: UnboundedReceiver<Envelope>,
    mut ctx: TokioContext,
    shutdown: CancellationToken,
) -> Box<dyn Process> {
    process.on_start(&mut ctx);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            envelope = inbox.recv() => match envelope {
                Some(Envelope { from, message }) => process.on_message(&mut ctx, from, message),
                None => break,
            },
        }
    }
    ctx.abort_timers();
    process
}

/// Runs a cluster on the ambient tokio runtime.
///
/// ```ignore
/// let report = TokioCluster::new(TxnConfig::fast_local()).with_seed(7).run().await?;
/// assert!(report.is_consistent());
/// ```
#[derive(Debug, Clone)]
pub struct TokioCluster {
    config: TxnConfig,
    seed: u64,
    settle: Duration,
    deadline: Duration,
}

impl TokioCluster {
    /// A cluster for `config`, seed 0.
    ///
    /// The settle period defaults to one partition recovery plus two
    /// decision timeouts; the deadline to one minute.
    pub fn new(config: TxnConfig) -> Self {
        let settle = config.partition_recovery() + config.decision_timeout() * 2;
        Self {
            config,
            seed: 0,
            settle,
            deadline: Duration::from_secs(60),
        }
    }

    /// Seed of the per-process random streams.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// How long to keep running after the last client result.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Give up if the clients have not finished by then.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the workload to completion and audit the result.
    pub async fn run(self) -> Result<TokioReport> {
        self.config.validate()?;
        let started = std::time::Instant::now();
        let topology = Topology::from_config(&self.config);
        let expected_results =
            (self.config.clients as usize) * (self.config.txns_per_client as usize);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<HistoryEntry>();
        let mut senders = BTreeMap::new();
        let mut members = Vec::new();
        for process in topology.build_processes(&self.config) {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(process.id(), tx);
            members.push((process, rx));
        }
        let router: Router = Arc::new(senders);

        let shutdown = CancellationToken::new();
        let epoch = Instant::now();
        let mut tasks = Vec::with_capacity(members.len());
        for (process, inbox) in members {
            let ctx = TokioContext::new(process.id(), self.seed, epoch, router.clone(), events_tx.clone());
            tasks.push(tokio::spawn(drive(process, inbox, ctx, shutdown.clone())));
        }
        drop(events_tx);

        info!(
            coordinators = topology.coordinator_count(),
            partitions = topology.partition_count(),
            clients = topology.client_count(),
            seed = self.seed,
            "cluster started"
        );

        let mut history = History::new();
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);
        while history.client_results() < expected_results {
            tokio::select! {
                entry = events_rx.recv() => match entry {
                    Some(entry) => history.push(entry.at, entry.process, entry.event),
                    None => break,
                },
                _ = &mut deadline => {
                    shutdown.cancel();
                    warn!(results = history.client_results(), expected = expected_results, "deadline exceeded");
                    return Err(TxnError::DeadlineExceeded(self.deadline));
                }
            }
        }

        debug!(settle = ?self.settle, "workload complete, settling");
        let settle = tokio::time::sleep(self.settle);
        tokio::pin!(settle);
        loop {
            tokio::select! {
                entry = events_rx.recv() => match entry {
                    Some(entry) => history.push(entry.at, entry.process, entry.event),
                    None => break,
                },
                _ = &mut settle => break,
            }
        }

        shutdown.cancel();
        let mut processes = Vec::with_capacity(tasks.len());
        for task in tasks {
            processes.push(task.await.map_err(|e| TxnError::TaskFailed(e.to_string()))?);
        }
        while let Ok(entry) = events_rx.try_recv() {
            history.push(entry.at, entry.process, entry.event);
        }

        let partitions: Vec<&Partition> = processes
            .iter()
            .filter_map(|p| p.as_any().downcast_ref::<Partition>())
            .collect();
        let partition_sums: Vec<(u32, Value)> =
            partitions.iter().map(|p| (p.index(), p.sum())).collect();
        let in_doubt: usize = partitions.iter().map(|p| p.undecided().len()).sum();
        let total: Value = partition_sums.iter().map(|(_, s)| *s).sum();

        let report = TokioReport {
            partition_sums,
            total,
            expected: self.config.expected_total(),
            commits: history.decided_count(Outcome::Commit),
            aborts: history.decided_count(Outcome::Abort),
            client_results: history.client_results(),
            crashes: history.crashes(),
            in_doubt,
            wall_time: started.elapsed(),
            history,
        };
        if report.is_consistent() {
            info!(total = report.total, commits = report.commits, aborts = report.aborts, "cluster stopped");
        } else {
            warn!(total = report.total, expected = report.expected, in_doubt = report.in_doubt, "cluster stopped inconsistent");
        }
        Ok(report)
    }
}

/// Outcome of a [`TokioCluster`] run.
#[derive(Debug, Clone)]
pub struct TokioReport {
    /// Committed sum of each partition.
    pub partition_sums: Vec<(u32, Value)>,
    /// Sum over all partitions.
    pub total: Value,
    /// Sum of the initial values.
    pub expected: Value,
    /// Transactions decided COMMIT.
    pub commits: usize,
    /// Transactions decided ABORT.
    pub aborts: usize,
    /// Results delivered to clients.
    pub client_results: usize,
    /// Crashes injected.
    pub crashes: usize,
    /// Transactions some partition was still uncertain about at shutdown.
    pub in_doubt: usize,
    /// Total wall-clock time for execution
    pub wall_time: Duration,
    /// Every protocol event recorded.
    pub history: History,
}

impl TokioReport {
    /// Conservation holds and no partition is in doubt.
    pub fn is_consistent(&self) -> bool {
        self.in_doubt == 0 && self.total == self.expected
    }
}

impl fmt::Display for TokioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Tokio Execution Report ===")?;
        writeln!(f, "Client Results: {}", self.client_results)?;
        writeln!(f, "Committed: {}", self.commits)?;
        writeln!(f, "Aborted: {}", self.aborts)?;
        writeln!(f, "Crashes: {}", self.crashes)?;
        writeln!(f, "Total Wall Time: {:?}", self.wall_time)?;
        writeln!(f)?;
        for (partition, sum) in &self.partition_sums {
            writeln!(f, "partition-{}: {}", partition, sum)?;
        }
        writeln!(f, "Total: {} (expected {})", self.total, self.expected)?;
        if self.in_doubt > 0 {
            writeln!(f, "In doubt: {}", self.in_doubt)?;
        }
        writeln!(
            f,
            "Consistent: {}",
            if self.is_consistent() { "yes" } else { "NO" }
        )?;
        Ok(())
    }
}
