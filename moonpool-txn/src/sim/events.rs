//! Discrete event queue of the simulator.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::message::Message;
use crate::process::TimerHandle;
use crate::types::ProcessId;

/// Events that can be scheduled in the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Run a process's start hook.
    Start {
        /// Process to start.
        process: ProcessId,
    },
    /// Deliver a message sent over the simulated network.
    Deliver {
        /// Sender.
        from: ProcessId,
        /// Recipient.
        to: ProcessId,
        /// Payload.
        message: Message,
    },
    /// Fire a timer a process scheduled for itself.
    Timer {
        /// Process that owns the timer.
        owner: ProcessId,
        /// Handle returned when the timer was scheduled.
        handle: TimerHandle,
        /// Message delivered to the owner.
        message: Message,
    },
}

impl Event {
    /// Process that will handle this event.
    pub fn target(&self) -> ProcessId {
        match self {
            Event::Start { process } => *process,
            Event::Deliver { to, .. } => *to,
            Event::Timer { owner, .. } => *owner,
        }
    }
}

/// An event scheduled for execution at a specific simulation time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    time: Duration,
    event: Event,
    sequence: u64,
}

impl ScheduledEvent {
    /// Creates a new scheduled event.
    pub fn new(time: Duration, event: Event, sequence: u64) -> Self {
        Self {
            time,
            event,
            sequence,
        }
    }

    /// Returns the scheduled execution time.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Returns a reference to the event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Consumes the scheduled event and returns the event.
    pub fn into_event(self) -> Event {
        self.event
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: reverse both keys so the earliest
        // (time, sequence) pops first.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A priority queue of events in chronological order.
///
/// Events scheduled for the same instant pop in scheduling order.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
    /// Creates a new empty event queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an event for execution.
    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.heap.push(event);
    }

    /// Removes and returns the earliest scheduled event.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    /// Returns a reference to the earliest scheduled event without removing it.
    pub fn peek_earliest(&self) -> Option<&ScheduledEvent> {
        self.heap.peek()
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the number of events in the queue.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(n: u32) -> Event {
        Event::Start {
            process: ProcessId::Partition(n),
        }
    }

    #[test]
    fn test_pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(ScheduledEvent::new(Duration::from_millis(30), start(3), 0));
        queue.schedule(ScheduledEvent::new(Duration::from_millis(10), start(1), 1));
        queue.schedule(ScheduledEvent::new(Duration::from_millis(20), start(2), 2));

        let order: Vec<ProcessId> = std::iter::from_fn(|| queue.pop_earliest())
            .map(|e| e.event().target())
            .collect();
        assert_eq!(
            order,
            vec![
                ProcessId::Partition(1),
                ProcessId::Partition(2),
                ProcessId::Partition(3)
            ]
        );
    }

    #[test]
    fn test_same_time_uses_sequence() {
        let mut queue = EventQueue::new();
        let at = Duration::from_millis(5);
        queue.schedule(ScheduledEvent::new(at, start(9), 2));
        queue.schedule(ScheduledEvent::new(at, start(8), 1));
        queue.schedule(ScheduledEvent::new(at, start(7), 3));

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.peek_earliest().map(|e| e.event().target()),
            Some(ProcessId::Partition(8))
        );
        let order: Vec<ProcessId> = std::iter::from_fn(|| queue.pop_earliest())
            .map(|e| e.into_event().target())
            .collect();
        assert_eq!(
            order,
            vec![
                ProcessId::Partition(8),
                ProcessId::Partition(9),
                ProcessId::Partition(7)
            ]
        );
        assert!(queue.is_empty());
    }
}
