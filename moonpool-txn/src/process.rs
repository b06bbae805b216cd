//! The process abstraction shared by the simulator and the tokio runtime.
//!
//! A [`Process`] is a single-threaded state machine: it handles one message
//! at a time through `&mut self` and talks to the outside world only through
//! its [`Context`]. The same coordinator, partition and client code runs
//! unchanged under [`SimWorld`](crate::SimWorld) and
//! [`TokioCluster`](crate::TokioCluster).
//!
//! ```text
//!            on_message(ctx, from, msg)
//!  inbox ─────────────────────────────► Process
//!                                          │ ctx.send / ctx.schedule / ctx.record
//!                                          ▼
//!                                       runtime
//! ```

use std::any::Any;
use std::time::Duration;

use crate::history::ProtocolEvent;
use crate::message::Message;
use crate::types::ProcessId;

/// Handle to a one-shot timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

/// Capabilities a runtime offers to the process it is driving.
pub trait Context {
    /// Id of the process being driven.
    fn me(&self) -> ProcessId;

    /// Time elapsed since the cluster started.
    fn now(&self) -> Duration;

    /// Send a message. Delivery is asynchronous and FIFO per link.
    fn send(&mut self, to: ProcessId, message: Message);

    /// Deliver `message` to this process after `delay`.
    fn schedule(&mut self, delay: Duration, message: Message) -> TimerHandle;

    /// Cancel a pending timer. Cancelling a fired timer is a no-op.
    fn cancel(&mut self, timer: TimerHandle);

    /// Probability sample in `[0, 1)`.
    fn random_f64(&mut self) -> f64;

    /// Uniform sample in `0..n`, or 0 when `n == 0`.
    fn random_below(&mut self, n: u64) -> u64;

    /// Append a protocol event to the cluster history.
    fn record(&mut self, event: ProtocolEvent);
}

/// A message-driven state machine.
pub trait Process: Send + 'static {
    /// Address of this process.
    fn id(&self) -> ProcessId;

    /// Called once when the runtime starts the process.
    fn on_start(&mut self, _ctx: &mut dyn Context) {}

    /// Handle one message.
    fn on_message(&mut self, ctx: &mut dyn Context, from: ProcessId, message: Message);

    /// Downcast support for inspecting final state.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
pub(crate) mod testing {
    //! A context that records effects instead of performing them.

    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Scripted randomness: `coin` is returned by every `random_f64` call.
    pub(crate) struct RecordingContext {
        pub me: ProcessId,
        pub now: Duration,
        pub sent: Vec<(ProcessId, Message)>,
        pub scheduled: Vec<(TimerHandle, Duration, Message)>,
        pub cancelled: Vec<TimerHandle>,
        pub events: Vec<ProtocolEvent>,
        pub coin: f64,
        next_timer: u64,
        rng: ChaCha8Rng,
    }

    impl RecordingContext {
        pub fn new(me: ProcessId) -> Self {
            Self {
                me,
                now: Duration::ZERO,
                sent: Vec::new(),
                scheduled: Vec::new(),
                cancelled: Vec::new(),
                events: Vec::new(),
                coin: 0.99,
                next_timer: 0,
                rng: ChaCha8Rng::seed_from_u64(0),
            }
        }

        /// Drain and return everything sent so far.
        pub fn take_sent(&mut self) -> Vec<(ProcessId, Message)> {
            std::mem::take(&mut self.sent)
        }

        /// Messages sent to `to`, in send order.
        pub fn sent_to(&self, to: ProcessId) -> Vec<Message> {
            self.sent
                .iter()
                .filter(|(dest, _)| *dest == to)
                .map(|(_, m)| m.clone())
                .collect()
        }

        /// Timers still pending (scheduled and not cancelled).
        pub fn pending_timers(&self) -> Vec<(TimerHandle, Message)> {
            self.scheduled
                .iter()
                .filter(|(h, _, _)| !self.cancelled.contains(h))
                .map(|(h, _, m)| (*h, m.clone()))
                .collect()
        }
    }

    impl Context for RecordingContext {
        fn me(&self) -> ProcessId {
            self.me
        }

        fn now(&self) -> Duration {
            self.now
        }

        fn send(&mut self, to: ProcessId, message: Message) {
            self.sent.push((to, message));
        }

        fn schedule(&mut self, delay: Duration, message: Message) -> TimerHandle {
            let handle = TimerHandle(self.next_timer);
            self.next_timer += 1;
            self.scheduled.push((handle, delay, message));
            handle
        }

        fn cancel(&mut self, timer: TimerHandle) {
            self.cancelled.push(timer);
        }

        fn random_f64(&mut self) -> f64 {
            self.coin
        }

        fn random_below(&mut self, n: u64) -> u64 {
            if n == 0 {
                0
            } else {
                self.rng.random_range(0..n)
            }
        }

        fn record(&mut self, event: ProtocolEvent) {
            self.events.push(event);
        }
    }
}
