//! The deterministic simulation world.
//!
//! [`SimWorld`] owns every process and a single event queue. Logical time
//! jumps from event to event; nothing sleeps. Each event is handled to
//! completion before the next one is popped, so a run is a pure function
//! of the seed.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{trace, warn};

use crate::buggify;
use crate::chaos::Invariant;
use crate::client::Client;
use crate::config::TxnConfig;
use crate::coordinator::Coordinator;
use crate::error::{Result, TxnError};
use crate::history::{History, ProtocolEvent};
use crate::message::Message;
use crate::partition::Partition;
use crate::process::{Context, Process, TimerHandle};
use crate::sim::events::{Event, EventQueue, ScheduledEvent};
use crate::sim::network::NetworkConfiguration;
use crate::sim::rng::{sim_random_below, sim_random_f64};
use crate::topology::Topology;
use crate::types::ProcessId;

/// Default bound on simulated time for one run.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(3600);

/// Default bound on processed events for one run.
pub const DEFAULT_EVENT_BUDGET: u64 = 10_000_000;

/// Everything except the processes, so a process and the core can be
/// borrowed mutably at the same time.
struct WorldCore {
    now: Duration,
    queue: EventQueue,
    next_sequence: u64,
    next_timer: u64,
    /// Timers still in the queue.
    armed: BTreeSet<TimerHandle>,
    /// Queued timers to skip when they pop.
    cancelled: BTreeSet<TimerHandle>,
    /// Latest delivery time scheduled on each (sender, recipient) link.
    link_clock: BTreeMap<(ProcessId, ProcessId), Duration>,
    network: NetworkConfiguration,
    history: History,
    events_processed: u64,
}

impl WorldCore {
    fn schedule_at(&mut self, time: Duration, event: Event) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.schedule(ScheduledEvent::new(time, event, sequence));
    }
}

struct SimContext<'a> {
    core: &'a mut WorldCore,
    me: ProcessId,
}

impl Context for SimContext<'_> {
    fn me(&self) -> ProcessId {
        self.me
    }

    fn now(&self) -> Duration {
        self.core.now
    }

    fn send(&mut self, to: ProcessId, message: Message) {
        let mut latency = self.core.network.sample_latency();
        if buggify!() {
            latency += self.core.network.buggified_delay;
        }
        let earliest = self.core.now + latency;
        let link = (self.me, to);
        let at = match self.core.link_clock.get(&link) {
            Some(last) if *last > earliest => *last,
            _ => earliest,
        };
        self.core.link_clock.insert(link, at);
        trace!(from = %self.me, to = %to, kind = message.kind(), at = ?at, "send");
        self.core.schedule_at(
            at,
            Event::Deliver {
                from: self.me,
                to,
                message,
            },
        );
    }

    fn schedule(&mut self, delay: Duration, message: Message) -> TimerHandle {
        let handle = TimerHandle(self.core.next_timer);
        self.core.next_timer += 1;
        let at = self.core.now + delay;
        self.core.armed.insert(handle);
        self.core.schedule_at(
            at,
            Event::Timer {
                owner: self.me,
                handle,
                message,
            },
        );
        handle
    }

    fn cancel(&mut self, timer: TimerHandle) {
        // A timer that already fired has nothing left to skip.
        if self.core.armed.remove(&timer) {
            self.core.cancelled.insert(timer);
        }
    }

    fn random_f64(&mut self) -> f64 {
        sim_random_f64()
    }

    fn random_below(&mut self, n: u64) -> u64 {
        sim_random_below(n)
    }

    fn record(&mut self, event: ProtocolEvent) {
        let now = self.core.now;
        self.core.history.push(now, self.me, event);
    }
}

/// A simulated cluster.
pub struct SimWorld {
    core: WorldCore,
    processes: BTreeMap<ProcessId, Box<dyn Process>>,
    time_limit: Duration,
    event_budget: u64,
}

impl SimWorld {
    /// An empty world on the given network.
    pub fn new(network: NetworkConfiguration) -> Self {
        Self {
            core: WorldCore {
                now: Duration::ZERO,
                queue: EventQueue::new(),
                next_sequence: 0,
                next_timer: 0,
                armed: BTreeSet::new(),
                cancelled: BTreeSet::new(),
                link_clock: BTreeMap::new(),
                network,
                history: History::new(),
                events_processed: 0,
            },
            processes: BTreeMap::new(),
            time_limit: DEFAULT_TIME_LIMIT,
            event_budget: DEFAULT_EVENT_BUDGET,
        }
    }

    /// A world populated with every process of `config`.
    pub fn from_config(config: &TxnConfig, network: NetworkConfiguration) -> Result<Self> {
        config.validate()?;
        let mut world = Self::new(network);
        for process in Topology::from_config(config).build_processes(config) {
            world.spawn(process)?;
        }
        Ok(world)
    }

    /// Bound simulated time for [`run`](Self::run).
    pub fn set_time_limit(&mut self, limit: Duration) {
        self.time_limit = limit;
    }

    /// Bound the number of events for [`run`](Self::run).
    pub fn set_event_budget(&mut self, budget: u64) {
        self.event_budget = budget;
    }

    /// Register a process; its start hook runs at the current time.
    pub fn spawn(&mut self, process: Box<dyn Process>) -> Result<()> {
        let id = process.id();
        if self.processes.contains_key(&id) {
            return Err(TxnError::DuplicateProcess(id));
        }
        self.processes.insert(id, process);
        let now = self.core.now;
        self.core.schedule_at(now, Event::Start { process: id });
        Ok(())
    }

    /// Deliver `message` from `from` to `to` at the current time, bypassing
    /// the latency model.
    pub fn inject(&mut self, from: ProcessId, to: ProcessId, message: Message) -> Result<()> {
        if !self.processes.contains_key(&to) {
            return Err(TxnError::UnknownProcess(to));
        }
        let now = self.core.now;
        self.core
            .schedule_at(now, Event::Deliver { from, to, message });
        Ok(())
    }

    /// Handle the next event. Returns `false` when the queue is empty.
    pub fn step(&mut self) -> bool {
        self.core.history.mark();
        let Some(scheduled) = self.core.queue.pop_earliest() else {
            return false;
        };
        self.core.now = scheduled.time();
        self.core.events_processed += 1;

        let event = scheduled.into_event();
        let target = event.target();
        let Some(process) = self.processes.get_mut(&target) else {
            warn!(to = %target, "event for unknown process dropped");
            return true;
        };
        let mut ctx = SimContext {
            core: &mut self.core,
            me: target,
        };
        match event {
            Event::Start { .. } => process.on_start(&mut ctx),
            Event::Deliver { from, message, .. } => process.on_message(&mut ctx, from, message),
            Event::Timer {
                owner,
                handle,
                message,
            } => {
                if ctx.core.cancelled.remove(&handle) {
                    trace!(owner = %owner, timer = handle.0, "cancelled timer skipped");
                } else {
                    ctx.core.armed.remove(&handle);
                    process.on_message(&mut ctx, owner, message);
                }
            }
        }
        true
    }

    /// Run until no event is left, checking `invariants` after every event.
    pub fn run(&mut self, invariants: &[Box<dyn Invariant>]) -> Result<()> {
        while self.step() {
            let now_ms = self.core.now.as_millis() as u64;
            for invariant in invariants {
                invariant.check(self, now_ms);
            }
            if self.core.now > self.time_limit {
                return Err(TxnError::TimeLimitExceeded {
                    limit: self.time_limit,
                    pending: self.core.queue.len(),
                });
            }
            if self.core.events_processed > self.event_budget {
                return Err(TxnError::EventBudgetExceeded(self.event_budget));
            }
        }
        let now_ms = self.core.now.as_millis() as u64;
        for invariant in invariants {
            invariant.check(self, now_ms);
        }
        Ok(())
    }

    /// Handle every event scheduled at or before `deadline`.
    pub fn run_until(&mut self, deadline: Duration) {
        while self
            .core
            .queue
            .peek_earliest()
            .is_some_and(|e| e.time() <= deadline)
        {
            self.step();
        }
        if self.core.now < deadline {
            self.core.now = deadline;
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.core.now
    }

    /// Whether no event is pending.
    pub fn is_quiescent(&self) -> bool {
        self.core.queue.is_empty()
    }

    /// Number of pending events.
    pub fn pending_events(&self) -> usize {
        self.core.queue.len()
    }

    /// Number of events handled so far.
    pub fn events_processed(&self) -> u64 {
        self.core.events_processed
    }

    /// Protocol events recorded so far.
    pub fn history(&self) -> &History {
        &self.core.history
    }

    /// Borrow a process as its concrete type.
    pub fn process<P: Process>(&self, id: ProcessId) -> Option<&P> {
        self.processes
            .get(&id)
            .and_then(|p| p.as_any().downcast_ref::<P>())
    }

    /// Partition `index`.
    pub fn partition(&self, index: u32) -> Option<&Partition> {
        self.process(ProcessId::Partition(index))
    }

    /// Coordinator `index`.
    pub fn coordinator(&self, index: u32) -> Option<&Coordinator> {
        self.process(ProcessId::Coordinator(index))
    }

    /// Client `index`.
    pub fn client(&self, index: u32) -> Option<&Client> {
        self.process(ProcessId::Client(index))
    }

    /// Every partition, by index.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.processes
            .values()
            .filter_map(|p| p.as_any().downcast_ref::<Partition>())
    }

    /// Every coordinator, by index.
    pub fn coordinators(&self) -> impl Iterator<Item = &Coordinator> {
        self.processes
            .values()
            .filter_map(|p| p.as_any().downcast_ref::<Coordinator>())
    }

    /// Every client, by index.
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.processes
            .values()
            .filter_map(|p| p.as_any().downcast_ref::<Client>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::rng::set_sim_seed;
    use std::any::Any;

    /// Echoes every message back and logs what it received.
    struct Echo {
        id: ProcessId,
        peer: ProcessId,
        received: Vec<Message>,
    }

    impl Process for Echo {
        fn id(&self) -> ProcessId {
            self.id
        }

        fn on_start(&mut self, ctx: &mut dyn Context) {
            if self.id == ProcessId::Client(0) {
                for seq in 0..20 {
                    ctx.send(self.peer, Message::DecisionRequest { txn: crate::types::TxnId::new(0, seq) });
                }
                let doomed = ctx.schedule(Duration::from_millis(5), Message::Recovery);
                ctx.cancel(doomed);
                ctx.schedule(Duration::from_millis(7), Message::TxnAccept);
            }
        }

        fn on_message(&mut self, _ctx: &mut dyn Context, _from: ProcessId, message: Message) {
            self.received.push(message);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn echo(id: ProcessId, peer: ProcessId) -> Box<dyn Process> {
        Box::new(Echo {
            id,
            peer,
            received: Vec::new(),
        })
    }

    #[test]
    fn test_per_link_fifo_and_cancelled_timers() {
        set_sim_seed(3);
        let mut world = SimWorld::new(NetworkConfiguration::default());
        world.spawn(echo(ProcessId::Client(0), ProcessId::Client(1))).expect("spawn");
        world.spawn(echo(ProcessId::Client(1), ProcessId::Client(0))).expect("spawn");
        world.run(&[]).expect("quiesce");

        let receiver = world.process::<Echo>(ProcessId::Client(1)).expect("process exists");
        let seqs: Vec<u64> = receiver
            .received
            .iter()
            .map(|m| match m {
                Message::DecisionRequest { txn } => txn.seq,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());

        let sender = world.process::<Echo>(ProcessId::Client(0)).expect("process exists");
        assert_eq!(sender.received, vec![Message::TxnAccept], "cancelled timer never fires");
        assert!(world.is_quiescent());
    }

    /// Cancels its own timer only after it has fired.
    struct LateCanceller {
        fired: Option<TimerHandle>,
    }

    impl Process for LateCanceller {
        fn id(&self) -> ProcessId {
            ProcessId::Partition(0)
        }

        fn on_start(&mut self, ctx: &mut dyn Context) {
            self.fired = Some(ctx.schedule(Duration::from_millis(1), Message::Recovery));
        }

        fn on_message(&mut self, ctx: &mut dyn Context, _from: ProcessId, _message: Message) {
            if let Some(handle) = self.fired.take() {
                ctx.cancel(handle);
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_cancelling_a_fired_timer_leaves_nothing_behind() {
        let mut world = SimWorld::new(NetworkConfiguration::default());
        world.spawn(Box::new(LateCanceller { fired: None })).expect("spawn");
        world.run(&[]).expect("quiesce");
        assert!(world.core.armed.is_empty());
        assert!(world.core.cancelled.is_empty());
    }

    #[test]
    fn test_duplicate_spawn_is_rejected() {
        let mut world = SimWorld::new(NetworkConfiguration::default());
        world.spawn(echo(ProcessId::Client(0), ProcessId::Client(0))).expect("spawn");
        let err = world
            .spawn(echo(ProcessId::Client(0), ProcessId::Client(0)))
            .unwrap_err();
        assert!(matches!(err, TxnError::DuplicateProcess(ProcessId::Client(0))));
    }

    #[test]
    fn test_inject_to_unknown_process_fails() {
        let mut world = SimWorld::new(NetworkConfiguration::default());
        let err = world
            .inject(ProcessId::Client(0), ProcessId::Partition(9), Message::Recovery)
            .unwrap_err();
        assert!(matches!(err, TxnError::UnknownProcess(_)));
    }

    #[test]
    fn test_run_until_advances_clock() {
        let mut world = SimWorld::new(NetworkConfiguration::default());
        world.run_until(Duration::from_millis(250));
        assert_eq!(world.now(), Duration::from_millis(250));
        assert_eq!(world.events_processed(), 0);
    }
}
