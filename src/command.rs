//! Command trait and lifecycle state machine.
//!
//! ```text
//! Idle -> Scheduled -> Running -> Ended
//!             \___________________/^
//! ```
//!
//! A command cancelled while still `Scheduled` goes straight to `Ended`
//! without any lifecycle call. Once `Running`, `end` is called exactly once.

use crate::hal::HardwareFault;
use crate::subsystems::{SubsystemId, SubsystemSet};
use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(u32);

impl CommandId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// `is_finished` returned true.
    Finished,
    /// A newly admitted command claimed a required subsystem.
    Interrupted,
    /// A lifecycle method returned an error.
    Faulted,
    /// Cancelled by the caller.
    Cancelled,
    /// Refused admission because a holder would not yield.
    Rejected,
    Shutdown,
}

impl EndReason {
    /// Value passed to [`Command::end`].
    pub const fn interrupted(self) -> bool {
        !matches!(self, EndReason::Finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    Idle,
    Scheduled,
    Running,
    Ended(EndReason),
}

impl CommandState {
    pub const fn is_ended(self) -> bool {
        matches!(self, CommandState::Ended(_))
    }
}

/// What happens when a newly admitted command needs a subsystem this
/// command holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionBehavior {
    #[default]
    CancelSelf,
    CancelIncoming,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("{0}")]
    Failed(String),

    #[error("hardware fault: {0}")]
    Hardware(#[from] HardwareFault),

    #[error("{0} is borrowed elsewhere")]
    SubsystemBusy(SubsystemId),

    #[error("illegal transition {from:?} -> {to:?}")]
    InvalidTransition { from: CommandState, to: CommandState },
}

/// A schedulable control behavior.
///
/// No method may block: long-running behavior spans many `execute` calls.
pub trait Command {
    fn name(&self) -> &str {
        "command"
    }

    /// Subsystems held exclusively while running. Read once, at scheduling.
    fn requirements(&self) -> SubsystemSet;

    fn interruption_behavior(&self) -> InterruptionBehavior {
        InterruptionBehavior::CancelSelf
    }

    fn initialize(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    fn execute(&mut self) -> Result<(), CommandError>;

    fn is_finished(&self) -> bool {
        false
    }

    /// Called exactly once per activation, on every exit path.
    fn end(&mut self, interrupted: bool) -> Result<(), CommandError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    state: CommandState,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self { state: CommandState::Idle }
    }

    pub const fn state(&self) -> CommandState {
        self.state
    }

    pub const fn is_running(&self) -> bool {
        matches!(self.state, CommandState::Running)
    }

    /// # Errors
    /// `InvalidTransition` unless `Idle`.
    pub fn schedule(&mut self) -> Result<(), CommandError> {
        self.transition(CommandState::Idle, CommandState::Scheduled)
    }

    /// # Errors
    /// `InvalidTransition` unless `Scheduled`.
    pub fn start(&mut self) -> Result<(), CommandError> {
        self.transition(CommandState::Scheduled, CommandState::Running)
    }

    /// Returns false when already ended.
    pub fn finish(&mut self, reason: EndReason) -> bool {
        if self.state.is_ended() {
            return false;
        }
        self.state = CommandState::Ended(reason);
        true
    }

    fn transition(&mut self, from: CommandState, to: CommandState) -> Result<(), CommandError> {
        if self.state != from {
            return Err(CommandError::InvalidTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// A command owned by the scheduler, with its requirements frozen.
pub(crate) struct ActiveCommand {
    pub(crate) id: CommandId,
    pub(crate) requirements: SubsystemSet,
    pub(crate) behavior: InterruptionBehavior,
    command: Box<dyn Command>,
    lifecycle: Lifecycle,
}

impl ActiveCommand {
    pub(crate) fn new(id: CommandId, command: Box<dyn Command>) -> Self {
        let mut lifecycle = Lifecycle::new();
        // Idle -> Scheduled cannot fail on a fresh lifecycle.
        let _ = lifecycle.schedule();
        Self {
            id,
            requirements: command.requirements(),
            behavior: command.interruption_behavior(),
            command,
            lifecycle,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.command.name()
    }

    pub(crate) fn state(&self) -> CommandState {
        self.lifecycle.state()
    }

    pub(crate) fn start(&mut self) -> Result<(), CommandError> {
        self.lifecycle.start()?;
        self.command.initialize()
    }

    pub(crate) fn execute(&mut self) -> Result<(), CommandError> {
        if !self.lifecycle.is_running() {
            return Err(CommandError::InvalidTransition {
                from: self.lifecycle.state(),
                to: CommandState::Running,
            });
        }
        self.command.execute()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.command.is_finished()
    }

    /// Moves to `Ended`. `Ok(true)` when `end` was invoked, `Ok(false)` when
    /// the command never started or had already ended.
    pub(crate) fn end(&mut self, reason: EndReason) -> Result<bool, CommandError> {
        let was_running = self.lifecycle.is_running();
        if !self.lifecycle.finish(reason) || !was_running {
            return Ok(false);
        }
        self.command.end(reason.interrupted()).map(|()| true)
    }
}

impl fmt::Debug for ActiveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCommand")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        initialize: u32,
        execute: u32,
        ends: std::vec::Vec<bool>,
    }

    struct Counting(Rc<RefCell<Calls>>);

    impl Command for Counting {
        fn requirements(&self) -> SubsystemSet {
            SubsystemSet::new()
        }

        fn initialize(&mut self) -> Result<(), CommandError> {
            self.0.borrow_mut().initialize += 1;
            Ok(())
        }

        fn execute(&mut self) -> Result<(), CommandError> {
            self.0.borrow_mut().execute += 1;
            Ok(())
        }

        fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
            self.0.borrow_mut().ends.push(interrupted);
            Ok(())
        }
    }

    fn active() -> (Rc<RefCell<Calls>>, ActiveCommand) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let command = ActiveCommand::new(CommandId::new(1), Box::new(Counting(Rc::clone(&calls))));
        (calls, command)
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), CommandState::Idle);
        lifecycle.schedule().unwrap();
        lifecycle.start().unwrap();
        assert!(lifecycle.is_running());
        assert!(lifecycle.finish(EndReason::Finished));
        assert_eq!(lifecycle.state(), CommandState::Ended(EndReason::Finished));
    }

    #[test]
    fn test_lifecycle_rejects_skipping_schedule() {
        let mut lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.start(),
            Err(CommandError::InvalidTransition { from: CommandState::Idle, to: CommandState::Running })
        ));
    }

    #[test]
    fn test_ended_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.schedule().unwrap();
        lifecycle.start().unwrap();
        assert!(lifecycle.finish(EndReason::Interrupted));
        assert!(!lifecycle.finish(EndReason::Finished));
        assert!(lifecycle.start().is_err());
        assert_eq!(lifecycle.state(), CommandState::Ended(EndReason::Interrupted));
    }

    #[test]
    fn test_end_called_once() {
        let (calls, mut command) = active();
        command.start().unwrap();
        command.execute().unwrap();

        assert_eq!(command.end(EndReason::Finished), Ok(true));
        assert_eq!(command.end(EndReason::Interrupted), Ok(false));
        assert_eq!(calls.borrow().ends, vec![false]);
    }

    #[test]
    fn test_end_before_start_skips_callbacks() {
        let (calls, mut command) = active();
        assert_eq!(command.end(EndReason::Cancelled), Ok(false));
        assert_eq!(command.state(), CommandState::Ended(EndReason::Cancelled));
        assert_eq!(calls.borrow().initialize, 0);
        assert!(calls.borrow().ends.is_empty());
    }

    #[test]
    fn test_execute_requires_running() {
        let (calls, mut command) = active();
        assert!(command.execute().is_err());
        assert_eq!(calls.borrow().execute, 0);
    }

    #[test]
    fn test_interrupted_flag() {
        assert!(!EndReason::Finished.interrupted());
        assert!(EndReason::Interrupted.interrupted());
        assert!(EndReason::Faulted.interrupted());
        assert!(EndReason::Shutdown.interrupted());
    }
}
