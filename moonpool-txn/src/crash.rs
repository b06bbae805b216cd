//! Crash-stop / recover substrate.
//!
//! Coordinators and partitions embed a [`CrashRecovery`] value and implement
//! [`Recoverable`]; every incoming message goes through
//! [`Recoverable::screen`] before the component sees it.
//!
//! ```text
//!              crash(recover_after)
//!   Running ───────────────────────────► Crashed
//!      ▲      schedules Recovery              │ drops everything except
//!      │                                      │ Recovery and admitted messages
//!      └────────── Recovery ◄─────────────────┘
//!                  then on_recovery()
//! ```
//!
//! A crash keeps all in-memory state: only message handling stops.

use std::time::Duration;

use tracing::{debug, info};

use crate::history::ProtocolEvent;
use crate::message::Message;
use crate::process::Context;

/// Liveness state of a crash-recoverable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrashState {
    /// Handling messages normally.
    #[default]
    Running,
    /// Dropping messages until `Recovery` arrives.
    Crashed,
}

/// The `{Running, Crashed}` state machine.
#[derive(Debug, Clone, Default)]
pub struct CrashRecovery {
    state: CrashState,
    crashes: u64,
}

impl CrashRecovery {
    /// A running component.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> CrashState {
        self.state
    }

    /// Whether the component is crashed.
    pub fn is_crashed(&self) -> bool {
        self.state == CrashState::Crashed
    }

    /// Number of crashes so far.
    pub fn crashes(&self) -> u64 {
        self.crashes
    }

    /// Switch to `Crashed`. Returns `false` if already crashed.
    fn enter(&mut self) -> bool {
        if self.is_crashed() {
            return false;
        }
        self.state = CrashState::Crashed;
        self.crashes += 1;
        true
    }

    fn leave(&mut self) {
        self.state = CrashState::Running;
    }
}

/// A component that can crash and recover.
pub trait Recoverable {
    /// The embedded state machine.
    fn crash_recovery(&self) -> &CrashRecovery;

    /// Mutable access to the embedded state machine.
    fn crash_recovery_mut(&mut self) -> &mut CrashRecovery;

    /// Messages the component still handles while crashed.
    fn admits_while_crashed(&self, _message: &Message) -> bool {
        false
    }

    /// Called after leaving the crashed state.
    fn on_recovery(&mut self, ctx: &mut dyn Context);

    /// Crash now and schedule recovery after `recover_after`.
    ///
    /// Crashing an already crashed component does nothing.
    fn crash(&mut self, ctx: &mut dyn Context, recover_after: Duration) {
        if !self.crash_recovery_mut().enter() {
            return;
        }
        info!(process = %ctx.me(), recover_after = ?recover_after, "crashed");
        ctx.record(ProtocolEvent::Crashed);
        ctx.schedule(recover_after, Message::Recovery);
    }

    /// Filter an incoming message through the crash state.
    ///
    /// Returns the message when the component should handle it.
    /// `Recovery` is consumed here: it ends a crash and runs
    /// [`on_recovery`](Self::on_recovery).
    fn screen(&mut self, ctx: &mut dyn Context, message: Message) -> Option<Message> {
        let crashed = self.crash_recovery().is_crashed();
        match message {
            Message::Recovery if crashed => {
                self.crash_recovery_mut().leave();
                info!(process = %ctx.me(), "recovered");
                ctx.record(ProtocolEvent::Recovered);
                self.on_recovery(ctx);
                None
            }
            Message::Recovery => {
                debug!(process = %ctx.me(), "ignoring recovery while running");
                None
            }
            message if !crashed || self.admits_while_crashed(&message) => Some(message),
            message => {
                debug!(process = %ctx.me(), kind = message.kind(), "dropped while crashed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingContext;
    use crate::types::{ProcessId, TxnId};

    #[derive(Default)]
    struct Probe {
        crash: CrashRecovery,
        recoveries: usize,
    }

    impl Recoverable for Probe {
        fn crash_recovery(&self) -> &CrashRecovery {
            &self.crash
        }

        fn crash_recovery_mut(&mut self) -> &mut CrashRecovery {
            &mut self.crash
        }

        fn admits_while_crashed(&self, message: &Message) -> bool {
            matches!(message, Message::CheckConsistentRequest { .. })
        }

        fn on_recovery(&mut self, _ctx: &mut dyn Context) {
            self.recoveries += 1;
        }
    }

    fn vote_request() -> Message {
        Message::VoteRequest {
            txn: TxnId::new(0, 1),
        }
    }

    #[test]
    fn test_running_passes_messages_through() {
        let mut ctx = RecordingContext::new(ProcessId::Partition(0));
        let mut probe = Probe::default();
        assert_eq!(probe.screen(&mut ctx, vote_request()), Some(vote_request()));
    }

    #[test]
    fn test_crash_schedules_recovery_and_drops_messages() {
        let mut ctx = RecordingContext::new(ProcessId::Partition(0));
        let mut probe = Probe::default();

        probe.crash(&mut ctx, Duration::from_millis(3000));
        assert!(probe.crash_recovery().is_crashed());
        assert_eq!(ctx.scheduled.len(), 1);
        assert_eq!(ctx.scheduled[0].1, Duration::from_millis(3000));
        assert_eq!(ctx.scheduled[0].2, Message::Recovery);
        assert_eq!(ctx.events, vec![ProtocolEvent::Crashed]);

        assert_eq!(probe.screen(&mut ctx, vote_request()), None);
    }

    #[test]
    fn test_admitted_messages_survive_crash() {
        let mut ctx = RecordingContext::new(ProcessId::Partition(0));
        let mut probe = Probe::default();
        probe.crash(&mut ctx, Duration::from_millis(10));

        let audit = Message::CheckConsistentRequest {
            txn: TxnId::new(0, 1),
        };
        assert_eq!(probe.screen(&mut ctx, audit.clone()), Some(audit));
    }

    #[test]
    fn test_recovery_runs_hook_once() {
        let mut ctx = RecordingContext::new(ProcessId::Coordinator(0));
        let mut probe = Probe::default();
        probe.crash(&mut ctx, Duration::from_millis(10));

        assert_eq!(probe.screen(&mut ctx, Message::Recovery), None);
        assert_eq!(probe.recoveries, 1);
        assert_eq!(probe.crash_recovery().state(), CrashState::Running);

        // A stray recovery while running is ignored.
        assert_eq!(probe.screen(&mut ctx, Message::Recovery), None);
        assert_eq!(probe.recoveries, 1);
    }

    #[test]
    fn test_crash_while_crashed_is_noop() {
        let mut ctx = RecordingContext::new(ProcessId::Partition(1));
        let mut probe = Probe::default();
        probe.crash(&mut ctx, Duration::from_millis(10));
        probe.crash(&mut ctx, Duration::from_millis(10));
        assert_eq!(probe.crash_recovery().crashes(), 1);
        assert_eq!(ctx.scheduled.len(), 1);
    }
}
