#![allow(dead_code)]

use robocycle::hal::Hal;
use robocycle::{Command, CommandError, InterruptionBehavior, Subsystem, SubsystemSet};
use std::cell::RefCell;
use std::rc::Rc;

pub type EventLog = Rc<RefCell<Vec<String>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.borrow().clone()
}

/// Subsystem with no actuators that counts `periodic` calls and records the
/// snapshot sequence it observed.
pub struct Mechanism {
    name: &'static str,
    hal: Option<Hal>,
    pub periodic_calls: u32,
    pub seen_sequences: Vec<u64>,
}

impl Mechanism {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hal: None,
            periodic_calls: 0,
            seen_sequences: Vec::new(),
        }
    }

    pub fn watching(name: &'static str, hal: Hal) -> Self {
        Self {
            hal: Some(hal),
            ..Self::new(name)
        }
    }
}

impl Subsystem for Mechanism {
    fn name(&self) -> &'static str {
        self.name
    }

    fn periodic(&mut self) {
        self.periodic_calls += 1;
        if let Some(hal) = &self.hal {
            self.seen_sequences.push(hal.snapshot().sequence);
        }
    }
}

/// Command that writes every lifecycle call to a shared log.
pub struct Probe {
    label: &'static str,
    requirements: SubsystemSet,
    log: EventLog,
    behavior: InterruptionBehavior,
    finish_after: Option<u32>,
    fail_initialize: bool,
    fail_execute: bool,
    fail_end: bool,
    executes: u32,
}

impl Probe {
    pub fn new(label: &'static str, requirements: SubsystemSet, log: &EventLog) -> Self {
        Self {
            label,
            requirements,
            log: Rc::clone(log),
            behavior: InterruptionBehavior::CancelSelf,
            finish_after: None,
            fail_initialize: false,
            fail_execute: false,
            fail_end: false,
            executes: 0,
        }
    }

    pub fn finishing_after(mut self, executes: u32) -> Self {
        self.finish_after = Some(executes);
        self
    }

    pub fn cancel_incoming(mut self) -> Self {
        self.behavior = InterruptionBehavior::CancelIncoming;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn failing_end(mut self) -> Self {
        self.fail_end = true;
        self
    }

    fn note(&self, event: &str) {
        self.log.borrow_mut().push(format!("{} {}", self.label, event));
    }
}

impl Command for Probe {
    fn name(&self) -> &str {
        self.label
    }

    fn requirements(&self) -> SubsystemSet {
        self.requirements.clone()
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.behavior
    }

    fn initialize(&mut self) -> Result<(), CommandError> {
        self.note("initialize");
        if self.fail_initialize {
            return Err(CommandError::Failed("initialize refused".into()));
        }
        Ok(())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        self.executes += 1;
        self.note("execute");
        if self.fail_execute {
            return Err(CommandError::Failed("execute refused".into()));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finish_after.map_or(false, |n| self.executes >= n)
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        self.note(&format!("end({})", interrupted));
        if self.fail_end {
            return Err(CommandError::Failed("end refused".into()));
        }
        Ok(())
    }
}
