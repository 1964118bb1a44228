//! Cooperative command scheduler.
//!
//! [`Scheduler::run_cycle`] is the single per-cycle entry point. Each cycle,
//! in order:
//!
//! 1. read the hardware once (a failed read keeps the previous snapshot);
//! 2. run every subsystem's `periodic` in registration order;
//! 3. `execute` every running command in admission order;
//! 4. end (`end(false)`) and release every command whose `is_finished` is true;
//! 5. admit pending commands in submission order, interrupting conflicting
//!    holders first;
//! 6. admit default commands for subsystems left without a holder;
//! 7. move queued HAL write faults into the fault log.
//!
//! A command admitted in step 5 first executes on the following cycle.

use crate::command::{ActiveCommand, Command, CommandError, CommandId, CommandState, EndReason, InterruptionBehavior};
use crate::fault::{Diagnostics, FaultKind, FaultLog};
use crate::hal::{ActuatorChannel, Hal, ACTUATOR_CHANNELS};
use crate::subsystems::{Subsystem, SubsystemHandle, SubsystemId, SubsystemSet, MAX_SUBSYSTEMS};
use heapless::{Deque, Vec};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info};

pub const MAX_RUNNING: usize = 16;
pub const MAX_PENDING: usize = 16;
const ENDED_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("unknown subsystem {0}")]
    UnknownSubsystem(SubsystemId),

    #[error("subsystem limit reached")]
    TooManySubsystems,

    #[error("too many requirements for one command")]
    TooManyRequirements,

    #[error("{channel} is already owned by the {owner} subsystem")]
    ChannelAlreadyOwned { channel: ActuatorChannel, owner: &'static str },

    #[error("pending command queue is full")]
    QueueFull,

    #[error("default command for {0} does not require it")]
    DefaultCommandMissingRequirement(SubsystemId),

    #[error("hardware already set up")]
    AlreadySetUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capped at `MAX_PENDING`.
    pub pending_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pending_capacity: MAX_PENDING,
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: f64,
    pub hardware_fault: bool,
    pub admitted: u8,
    pub finished: u8,
    pub interrupted: u8,
    pub faulted: u8,
    pub rejected: u8,
}

type DefaultFactory = Box<dyn FnMut() -> Box<dyn Command>>;

struct Registered {
    name: &'static str,
    subsystem: Rc<RefCell<dyn Subsystem>>,
    actuators: Vec<ActuatorChannel, ACTUATOR_CHANNELS>,
    holder: Option<CommandId>,
    default_command: Option<DefaultFactory>,
}

pub struct Scheduler {
    hal: Hal,
    config: SchedulerConfig,
    subsystems: Vec<Registered, MAX_SUBSYSTEMS>,
    running: Vec<ActiveCommand, MAX_RUNNING>,
    pending: Vec<ActiveCommand, MAX_PENDING>,
    ended: Deque<(CommandId, EndReason), ENDED_HISTORY>,
    faults: FaultLog,
    next_command_id: u32,
    cycle: u64,
}

impl Scheduler {
    pub fn new(hal: Hal) -> Self {
        Self::new_with_config(hal, SchedulerConfig::default())
    }

    pub fn new_with_config(hal: Hal, config: SchedulerConfig) -> Self {
        Self {
            hal,
            config,
            subsystems: Vec::new(),
            running: Vec::new(),
            pending: Vec::new(),
            ended: Deque::new(),
            faults: FaultLog::new(),
            next_command_id: 1,
            cycle: 0,
        }
    }

    /// One-time hardware configuration. Device failures are logged as
    /// hardware faults and counted in the return value; they never abort.
    ///
    /// # Errors
    /// `SchedulerError::AlreadySetUp` on a second call.
    pub fn setup(&mut self) -> Result<usize, SchedulerError> {
        let faults = self.hal.setup().map_err(|_| SchedulerError::AlreadySetUp)?;
        for fault in &faults {
            self.faults.record(FaultKind::Hardware, self.cycle, "setup", fault);
        }
        info!("hardware set up with {} device fault(s)", faults.len());
        Ok(faults.len())
    }

    /// # Errors
    /// `TooManySubsystems`, or `ChannelAlreadyOwned` if another registered
    /// subsystem already writes one of this subsystem's channels.
    pub fn register<S: Subsystem + 'static>(&mut self, subsystem: S) -> Result<SubsystemHandle<S>, SchedulerError> {
        if self.subsystems.is_full() {
            return Err(SchedulerError::TooManySubsystems);
        }

        let mut actuators = Vec::new();
        for &channel in subsystem.actuators() {
            if let Some(owner) = self.subsystems.iter().find(|slot| slot.actuators.contains(&channel)) {
                return Err(SchedulerError::ChannelAlreadyOwned {
                    channel,
                    owner: owner.name,
                });
            }
            if !actuators.contains(&channel) {
                let _ = actuators.push(channel);
            }
        }

        let id = SubsystemId::new(self.subsystems.len() as u8);
        let name = subsystem.name();
        let inner = Rc::new(RefCell::new(subsystem));
        let shared: Rc<RefCell<dyn Subsystem>> = inner.clone();
        if self
            .subsystems
            .push(Registered {
                name,
                subsystem: shared,
                actuators,
                holder: None,
                default_command: None,
            })
            .is_err()
        {
            return Err(SchedulerError::TooManySubsystems);
        }

        info!("registered {} subsystem as {}", name, id);
        Ok(SubsystemHandle::new(id, inner))
    }

    /// Installs a factory whose fresh instance is admitted whenever the
    /// subsystem has no holder. The factory is called once here to check
    /// that its commands require the subsystem.
    ///
    /// # Errors
    /// `UnknownSubsystem` or `DefaultCommandMissingRequirement`.
    pub fn set_default_command<C, F>(&mut self, subsystem: SubsystemId, mut factory: F) -> Result<(), SchedulerError>
    where
        C: Command + 'static,
        F: FnMut() -> C + 'static,
    {
        if subsystem.index() >= self.subsystems.len() {
            return Err(SchedulerError::UnknownSubsystem(subsystem));
        }
        let requirements = factory().requirements();
        if !requirements.contains(subsystem) {
            return Err(SchedulerError::DefaultCommandMissingRequirement(subsystem));
        }
        self.check_registered(&requirements)?;

        self.subsystems[subsystem.index()].default_command = Some(Box::new(move || Box::new(factory()) as Box<dyn Command>));
        Ok(())
    }

    pub fn clear_default_command(&mut self, subsystem: SubsystemId) {
        if let Some(slot) = self.subsystems.get_mut(subsystem.index()) {
            slot.default_command = None;
        }
    }

    /// Queue a command for admission at the next cycle.
    ///
    /// # Errors
    /// `UnknownSubsystem` if a requirement is not registered here,
    /// `QueueFull` when the pending queue is at capacity.
    pub fn schedule<C: Command + 'static>(&mut self, command: C) -> Result<CommandId, SchedulerError> {
        self.schedule_boxed(Box::new(command))
    }

    /// # Errors
    /// See [`Scheduler::schedule`].
    pub fn schedule_boxed(&mut self, command: Box<dyn Command>) -> Result<CommandId, SchedulerError> {
        let entry = ActiveCommand::new(CommandId::new(self.next_command_id), command);
        self.check_registered(&entry.requirements)?;
        if self.pending.len() >= self.config.pending_capacity.min(MAX_PENDING) {
            return Err(SchedulerError::QueueFull);
        }

        let id = entry.id;
        debug!("{} ({}) scheduled", id, entry.name());
        self.pending.push(entry).map_err(|_| SchedulerError::QueueFull)?;
        self.next_command_id = self.next_command_id.wrapping_add(1);
        Ok(id)
    }

    /// Ends a command early. Running commands get `end(true)`; commands still
    /// waiting for admission are dropped without lifecycle calls. Returns
    /// false if the command is unknown or already ended.
    pub fn cancel(&mut self, id: CommandId) -> bool {
        if let Some(position) = self.pending.iter().position(|entry| entry.id == id) {
            let entry = self.pending.remove(position);
            debug!("{} ({}) cancelled before admission", id, entry.name());
            self.retire(entry, EndReason::Cancelled);
            return true;
        }
        if let Some(position) = self.running.iter().position(|entry| entry.id == id) {
            let entry = self.running.remove(position);
            debug!("{} ({}) cancelled", id, entry.name());
            self.retire(entry, EndReason::Cancelled);
            self.drain_hal_faults();
            return true;
        }
        false
    }

    /// Ends every running command with `end(true)` and discards the pending
    /// queue. Also runs on drop.
    pub fn shutdown(&mut self) {
        let running = core::mem::take(&mut self.running);
        let pending = core::mem::take(&mut self.pending);
        if running.is_empty() && pending.is_empty() {
            return;
        }

        info!(
            "shutting down: ending {} running and discarding {} pending command(s)",
            running.len(),
            pending.len()
        );
        for entry in running {
            self.retire(entry, EndReason::Shutdown);
        }
        for entry in pending {
            self.retire(entry, EndReason::Shutdown);
        }
        self.drain_hal_faults();
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        match self.hal.update() {
            Ok(snapshot) => report.timestamp = snapshot.timestamp,
            Err(fault) => {
                report.hardware_fault = true;
                report.timestamp = self.hal.snapshot().timestamp;
                self.faults.record(FaultKind::Hardware, self.cycle, "hal", &fault);
            }
        }

        for slot in &self.subsystems {
            match slot.subsystem.try_borrow_mut() {
                Ok(mut subsystem) => subsystem.periodic(),
                Err(_) => {
                    self.faults.record(
                        FaultKind::Subsystem,
                        self.cycle,
                        slot.name,
                        &"periodic skipped: borrowed elsewhere",
                    );
                }
            }
        }

        self.execute_running(&mut report);
        self.retire_finished(&mut report);

        let pending = core::mem::take(&mut self.pending);
        for entry in pending {
            self.admit(entry, &mut report);
        }

        self.admit_defaults(&mut report);
        self.drain_hal_faults();
        report
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn hal(&self) -> &Hal {
        &self.hal
    }

    pub fn state(&self, id: CommandId) -> Option<CommandState> {
        self.running
            .iter()
            .chain(self.pending.iter())
            .find(|entry| entry.id == id)
            .map(ActiveCommand::state)
            .or_else(|| {
                self.ended
                    .iter()
                    .find(|(ended, _)| *ended == id)
                    .map(|&(_, reason)| CommandState::Ended(reason))
            })
    }

    pub fn is_running(&self, id: CommandId) -> bool {
        self.running.iter().any(|entry| entry.id == id)
    }

    pub fn holder(&self, subsystem: SubsystemId) -> Option<CommandId> {
        self.subsystems.get(subsystem.index()).and_then(|slot| slot.holder)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Running commands in admission order.
    pub fn running_commands(&self) -> impl Iterator<Item = (CommandId, &str)> + '_ {
        self.running.iter().map(|entry| (entry.id, entry.name()))
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            cycle: self.cycle,
            running_commands: self.running.len() as u8,
            pending_commands: self.pending.len() as u8,
            faults: self.faults.counts(),
            last_fault: self.faults.last().cloned(),
            hal: self.hal.stats(),
        }
    }

    fn check_registered(&self, requirements: &SubsystemSet) -> Result<(), SchedulerError> {
        match requirements.iter().find(|id| id.index() >= self.subsystems.len()) {
            Some(unknown) => Err(SchedulerError::UnknownSubsystem(unknown)),
            None => Ok(()),
        }
    }

    fn execute_running(&mut self, report: &mut CycleReport) {
        let mut index = 0;
        while index < self.running.len() {
            match self.running[index].execute() {
                Ok(()) => index += 1,
                Err(error) => {
                    let entry = self.running.remove(index);
                    self.fault(entry, "execute", &error, report);
                }
            }
        }
    }

    fn retire_finished(&mut self, report: &mut CycleReport) {
        let mut index = 0;
        while index < self.running.len() {
            if self.running[index].is_finished() {
                let entry = self.running.remove(index);
                debug!("{} ({}) finished", entry.id, entry.name());
                report.finished += 1;
                self.retire(entry, EndReason::Finished);
            } else {
                index += 1;
            }
        }
    }

    fn admit(&mut self, mut entry: ActiveCommand, report: &mut CycleReport) {
        let conflicts: Vec<CommandId, MAX_RUNNING> = self
            .running
            .iter()
            .filter(|running| running.requirements.intersects(&entry.requirements))
            .map(|running| running.id)
            .collect();

        let blocked = self
            .running
            .iter()
            .any(|running| conflicts.contains(&running.id) && running.behavior == InterruptionBehavior::CancelIncoming);
        if blocked || (conflicts.is_empty() && self.running.is_full()) {
            debug!("{} ({}) rejected", entry.id, entry.name());
            report.rejected += 1;
            let _ = entry.end(EndReason::Rejected);
            self.remember(entry.id, EndReason::Rejected);
            return;
        }

        for id in conflicts {
            if let Some(position) = self.running.iter().position(|running| running.id == id) {
                let holder = self.running.remove(position);
                debug!("{} ({}) interrupted by {} ({})", holder.id, holder.name(), entry.id, entry.name());
                self.faults.record_conflict();
                report.interrupted += 1;
                self.retire(holder, EndReason::Interrupted);
            }
        }

        self.acquire(&entry);
        if let Err(error) = entry.start() {
            self.fault(entry, "initialize", &error, report);
            return;
        }

        debug!("{} ({}) running", entry.id, entry.name());
        report.admitted += 1;
        if let Err(entry) = self.running.push(entry) {
            self.retire(entry, EndReason::Rejected);
        }
    }

    fn admit_defaults(&mut self, report: &mut CycleReport) {
        for index in 0..self.subsystems.len() {
            let slot = &mut self.subsystems[index];
            if slot.holder.is_some() {
                continue;
            }
            let Some(factory) = slot.default_command.as_mut() else {
                continue;
            };
            let command = factory();

            let entry = ActiveCommand::new(CommandId::new(self.next_command_id), command);
            self.next_command_id = self.next_command_id.wrapping_add(1);

            let all_free = entry.requirements.iter().all(|id| {
                self.subsystems
                    .get(id.index())
                    .map_or(false, |slot| slot.holder.is_none())
            });
            if all_free {
                debug!("{} ({}) admitted as default for {}", entry.id, entry.name(), self.subsystems[index].name);
                self.admit(entry, report);
            }
        }
    }

    fn acquire(&mut self, entry: &ActiveCommand) {
        for id in entry.requirements.iter() {
            if let Some(slot) = self.subsystems.get_mut(id.index()) {
                slot.holder = Some(entry.id);
            }
        }
    }

    fn release(&mut self, entry: &ActiveCommand) {
        for id in entry.requirements.iter() {
            if let Some(slot) = self.subsystems.get_mut(id.index()) {
                if slot.holder == Some(entry.id) {
                    slot.holder = None;
                }
            }
        }
    }

    /// End, then release, then remember.
    fn retire(&mut self, mut entry: ActiveCommand, reason: EndReason) {
        if let Err(error) = entry.end(reason) {
            self.faults
                .record(FaultKind::Command, self.cycle, entry.name(), &format_args!("end failed: {}", error));
        }
        self.release(&entry);
        self.remember(entry.id, reason);
    }

    fn fault(&mut self, entry: ActiveCommand, stage: &str, error: &CommandError, report: &mut CycleReport) {
        self.faults.record(
            FaultKind::Command,
            self.cycle,
            entry.name(),
            &format_args!("{} failed: {}", stage, error),
        );
        report.faulted += 1;
        self.retire(entry, EndReason::Faulted);
    }

    fn remember(&mut self, id: CommandId, reason: EndReason) {
        if self.ended.is_full() {
            self.ended.pop_front();
        }
        let _ = self.ended.push_back((id, reason));
    }

    fn drain_hal_faults(&mut self) {
        let pending = self.hal.take_faults();
        if pending.dropped > 0 {
            self.faults.record_many(
                FaultKind::Hardware,
                self.cycle,
                "hal",
                &format_args!("{} older write fault(s) dropped from a full queue", pending.dropped),
                pending.dropped,
            );
        }
        for fault in pending.faults {
            self.faults.record(FaultKind::Hardware, self.cycle, "hal", &fault);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ScriptedPort;

    struct Arm {
        channels: &'static [ActuatorChannel],
    }

    impl Subsystem for Arm {
        fn name(&self) -> &'static str {
            "arm"
        }

        fn actuators(&self) -> &[ActuatorChannel] {
            self.channels
        }
    }

    struct Idle(SubsystemSet);

    impl Command for Idle {
        fn requirements(&self) -> SubsystemSet {
            self.0.clone()
        }

        fn execute(&mut self) -> Result<(), CommandError> {
            Ok(())
        }

        fn end(&mut self, _interrupted: bool) -> Result<(), CommandError> {
            Ok(())
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Hal::new(ScriptedPort::new()))
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = scheduler();
        assert_eq!(scheduler.running_count(), 0);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.cycle(), 0);
    }

    #[test]
    fn test_registration_assigns_sequential_ids() {
        let mut scheduler = scheduler();
        let a = scheduler.register(Arm { channels: &[] }).unwrap();
        let b = scheduler.register(Arm { channels: &[] }).unwrap();
        assert_eq!(a.id().index(), 0);
        assert_eq!(b.id().index(), 1);
    }

    #[test]
    fn test_channel_has_single_owner() {
        let mut scheduler = scheduler();
        scheduler.register(Arm { channels: &[ActuatorChannel::LeftDrive] }).unwrap();

        let result = scheduler.register(Arm {
            channels: &[ActuatorChannel::RightDrive, ActuatorChannel::LeftDrive],
        });
        assert!(matches!(
            result,
            Err(SchedulerError::ChannelAlreadyOwned { channel: ActuatorChannel::LeftDrive, owner: "arm" })
        ));
    }

    #[test]
    fn test_subsystem_limit() {
        let mut scheduler = scheduler();
        for _ in 0..MAX_SUBSYSTEMS {
            scheduler.register(Arm { channels: &[] }).unwrap();
        }
        assert!(matches!(
            scheduler.register(Arm { channels: &[] }),
            Err(SchedulerError::TooManySubsystems)
        ));
    }

    #[test]
    fn test_unknown_requirement_rejected() {
        let mut scheduler = scheduler();
        let result = scheduler.schedule(Idle(SubsystemSet::of(SubsystemId::new(3))));
        assert_eq!(result, Err(SchedulerError::UnknownSubsystem(SubsystemId::new(3))));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_pending_capacity() {
        let mut scheduler = Scheduler::new_with_config(
            Hal::new(ScriptedPort::new()),
            SchedulerConfig { pending_capacity: 2 },
        );
        scheduler.schedule(Idle(SubsystemSet::new())).unwrap();
        scheduler.schedule(Idle(SubsystemSet::new())).unwrap();
        assert_eq!(
            scheduler.schedule(Idle(SubsystemSet::new())),
            Err(SchedulerError::QueueFull)
        );
    }

    #[test]
    fn test_command_ids_are_unique() {
        let mut scheduler = scheduler();
        let a = scheduler.schedule(Idle(SubsystemSet::new())).unwrap();
        let b = scheduler.schedule(Idle(SubsystemSet::new())).unwrap();
        assert_ne!(a, b);
        assert_eq!(scheduler.state(a), Some(CommandState::Scheduled));
    }

    #[test]
    fn test_setup_once() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.setup(), Ok(0));
        assert_eq!(scheduler.setup(), Err(SchedulerError::AlreadySetUp));
    }

    #[test]
    fn test_running_capacity_rejects_overflow() {
        let mut scheduler = Scheduler::new_with_config(
            Hal::new(ScriptedPort::new()),
            SchedulerConfig { pending_capacity: MAX_PENDING },
        );
        for _ in 0..MAX_RUNNING {
            scheduler.schedule(Idle(SubsystemSet::new())).unwrap();
        }
        scheduler.run_cycle();
        assert_eq!(scheduler.running_count(), MAX_RUNNING);

        let extra = scheduler.schedule(Idle(SubsystemSet::new())).unwrap();
        let report = scheduler.run_cycle();
        assert_eq!(report.rejected, 1);
        assert_eq!(scheduler.state(extra), Some(CommandState::Ended(EndReason::Rejected)));
    }

    #[test]
    fn test_default_command_must_require_its_subsystem() {
        let mut scheduler = scheduler();
        let arm = scheduler.register(Arm { channels: &[] }).unwrap();
        let result = scheduler.set_default_command(arm.id(), || Idle(SubsystemSet::new()));
        assert_eq!(result, Err(SchedulerError::DefaultCommandMissingRequirement(arm.id())));
    }
}
