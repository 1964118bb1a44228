//! Test double returning programmer-supplied readings.
//!
//! `ScriptedPort` is a cloneable handle: hand one clone to [`Hal`] and keep
//! another to change readings, queue faults and inspect what the core did.
//!
//! [`Hal`]: super::Hal

use super::{
    ActuatorChannel, HardwareFault, HardwarePort, HardwareSnapshot, SensorChannel, SetupFaults, MAX_SETUP_FAULTS,
    SENSOR_CHANNELS,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::warn;

const DEFAULT_PERIOD_S: f64 = 0.02;

/// One queued cycle of readings. Queued frames take precedence over the
/// fixed readings until the queue runs dry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedFrame {
    pub timestamp: f64,
    pub left_encoder_radians: f64,
    pub right_encoder_radians: f64,
}

#[derive(Debug)]
struct Script {
    timestamp: f64,
    period_s: f64,
    readings: [Option<f64>; SENSOR_CHANNELS],
    frames: VecDeque<ScriptedFrame>,
    read_faults: VecDeque<String>,
    write_faults: VecDeque<(ActuatorChannel, String)>,
    setup_faults: Vec<HardwareFault>,
    update_calls: u64,
    setup_calls: u32,
    writes: Vec<(ActuatorChannel, f64)>,
}

#[derive(Debug, Clone)]
pub struct ScriptedPort {
    script: Rc<RefCell<Script>>,
}

impl ScriptedPort {
    /// Both encoders read zero; the timestamp starts at zero and advances
    /// 20 ms per read.
    pub fn new() -> Self {
        Self {
            script: Rc::new(RefCell::new(Script {
                timestamp: 0.0,
                period_s: DEFAULT_PERIOD_S,
                readings: [Some(0.0); SENSOR_CHANNELS],
                frames: VecDeque::new(),
                read_faults: VecDeque::new(),
                write_faults: VecDeque::new(),
                setup_faults: Vec::new(),
                update_calls: 0,
                setup_calls: 0,
                writes: Vec::new(),
            })),
        }
    }

    /// Per-read timestamp increment. Zero freezes the clock.
    #[must_use]
    pub fn with_period(self, period_s: f64) -> Self {
        self.script.borrow_mut().period_s = period_s;
        self
    }

    pub fn set_reading(&self, channel: SensorChannel, value: f64) {
        self.script.borrow_mut().readings[channel.index()] = Some(value);
    }

    pub fn clear_reading(&self, channel: SensorChannel) {
        self.script.borrow_mut().readings[channel.index()] = None;
    }

    /// Timestamp reported by the next read.
    pub fn set_timestamp(&self, timestamp: f64) {
        self.script.borrow_mut().timestamp = timestamp;
    }

    pub fn queue_frame(&self, frame: ScriptedFrame) {
        self.script.borrow_mut().frames.push_back(frame);
    }

    pub fn fail_next_update(&self, reason: &str) {
        self.script.borrow_mut().read_faults.push_back(reason.to_string());
    }

    pub fn fail_next_write(&self, channel: ActuatorChannel, reason: &str) {
        self.script.borrow_mut().write_faults.push_back((channel, reason.to_string()));
    }

    pub fn fail_setup(&self, device: &str, reason: &str) {
        self.script.borrow_mut().setup_faults.push(HardwareFault::SetupFailed {
            device: device.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn update_calls(&self) -> u64 {
        self.script.borrow().update_calls
    }

    pub fn setup_calls(&self) -> u32 {
        self.script.borrow().setup_calls
    }

    /// Every applied write, in order.
    pub fn writes(&self) -> Vec<(ActuatorChannel, f64)> {
        self.script.borrow().writes.clone()
    }

    pub fn last_write(&self, channel: ActuatorChannel) -> Option<f64> {
        self.script
            .borrow()
            .writes
            .iter()
            .rev()
            .find(|(written, _)| *written == channel)
            .map(|(_, volts)| *volts)
    }
}

impl Default for ScriptedPort {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwarePort for ScriptedPort {
    fn setup(&mut self) -> SetupFaults {
        let mut script = self.script.borrow_mut();
        script.setup_calls += 1;

        let mut faults = SetupFaults::new();
        for fault in script.setup_faults.drain(..) {
            if let Err(fault) = faults.push(fault) {
                warn!("{} setup faults already reported, dropping: {}", MAX_SETUP_FAULTS, fault);
            }
        }
        faults
    }

    fn update(&mut self) -> Result<HardwareSnapshot, HardwareFault> {
        let mut script = self.script.borrow_mut();
        script.update_calls += 1;

        if let Some(reason) = script.read_faults.pop_front() {
            return Err(HardwareFault::ReadFailed(reason));
        }

        if let Some(frame) = script.frames.pop_front() {
            script.timestamp = frame.timestamp + script.period_s;
            return Ok(HardwareSnapshot::new(frame.timestamp)
                .with_reading(SensorChannel::LeftEncoder, frame.left_encoder_radians)
                .with_reading(SensorChannel::RightEncoder, frame.right_encoder_radians));
        }

        let mut snapshot = HardwareSnapshot::new(script.timestamp);
        for channel in SensorChannel::ALL {
            if let Some(value) = script.readings[channel.index()] {
                snapshot = snapshot.with_reading(channel, value);
            }
        }
        script.timestamp += script.period_s;
        Ok(snapshot)
    }

    fn set_actuator(&mut self, channel: ActuatorChannel, volts: f64) -> Result<(), HardwareFault> {
        let mut script = self.script.borrow_mut();
        if let Some(position) = script.write_faults.iter().position(|(failing, _)| *failing == channel) {
            if let Some((_, reason)) = script.write_faults.remove(position) {
                return Err(HardwareFault::WriteFailed { channel, reason });
            }
        }
        script.writes.push((channel, volts));
        Ok(())
    }
}
