//! Per-cycle telemetry frames for an external collector.

use crate::command::CommandId;
use crate::fault::{truncated, Diagnostics};
use crate::hal::{ActuatorChannel, HardwareSnapshot, ACTUATOR_CHANNELS};
use crate::scheduler::{CycleReport, Scheduler, MAX_RUNNING};
use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NAME_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningCommand {
    pub id: CommandId,
    pub name: ArrayString<NAME_LEN>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub report: CycleReport,
    pub snapshot: HardwareSnapshot,
    /// Last requested volts, indexed by `ActuatorChannel::index`.
    pub outputs: [Option<f64>; ACTUATOR_CHANNELS],
    pub running: Vec<RunningCommand, MAX_RUNNING>,
    pub diagnostics: Diagnostics,
}

impl TelemetryFrame {
    pub fn capture(scheduler: &Scheduler, report: &CycleReport) -> Self {
        let hal = scheduler.hal();
        let mut outputs = [None; ACTUATOR_CHANNELS];
        for channel in ActuatorChannel::ALL {
            outputs[channel.index()] = hal.output(channel);
        }

        let mut running = Vec::new();
        for (id, name) in scheduler.running_commands() {
            let _ = running.push(RunningCommand {
                id,
                name: truncated(name),
            });
        }

        Self {
            report: *report,
            snapshot: hal.snapshot(),
            outputs,
            running,
            diagnostics: scheduler.diagnostics(),
        }
    }

    /// # Errors
    /// `TelemetryError::Encode` if serialization fails.
    pub fn to_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandError};
    use crate::hal::{Hal, ScriptedPort, SensorChannel};
    use crate::subsystems::{Subsystem, SubsystemSet};

    struct Wrist;

    impl Subsystem for Wrist {
        fn name(&self) -> &'static str {
            "wrist"
        }
    }

    struct Hold(SubsystemSet);

    impl Command for Hold {
        fn name(&self) -> &str {
            "hold wrist"
        }

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

    #[test]
    fn test_frame_captures_cycle_state() {
        let port = ScriptedPort::new();
        port.set_reading(SensorChannel::LeftEncoder, 1.25);
        let hal = Hal::new(port);
        hal.set_actuator(ActuatorChannel::RightDrive, -3.0).unwrap();

        let mut scheduler = Scheduler::new(hal);
        let wrist = scheduler.register(Wrist).unwrap();
        let id = scheduler.schedule(Hold(SubsystemSet::of(wrist.id()))).unwrap();
        let report = scheduler.run_cycle();

        let frame = TelemetryFrame::capture(&scheduler, &report);
        assert_eq!(frame.report.cycle, 1);
        assert_eq!(frame.snapshot.reading(SensorChannel::LeftEncoder), Some(1.25));
        assert_eq!(frame.outputs[ActuatorChannel::RightDrive.index()], Some(-3.0));
        assert_eq!(frame.outputs[ActuatorChannel::LeftDrive.index()], None);
        assert_eq!(frame.running.len(), 1);
        assert_eq!(frame.running[0].id, id);
        assert_eq!(frame.running[0].name.as_str(), "hold wrist");
        assert_eq!(frame.diagnostics.running_commands, 1);
    }

    #[test]
    fn test_frame_json() {
        let mut scheduler = Scheduler::new(Hal::new(ScriptedPort::new()));
        let report = scheduler.run_cycle();
        let json = TelemetryFrame::capture(&scheduler, &report).to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["report"]["cycle"], 1);
        assert_eq!(value["diagnostics"]["hal"]["updates"], 1);
        assert!(value["running"].as_array().unwrap().is_empty());
    }
}
