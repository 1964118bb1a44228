//! Real-robot platform.
//!
//! Nothing here can be exercised without hardware except through the
//! [`MotorDriver`] and [`Clock`] seams, so the port holds no logic beyond
//! forwarding calls and converting native units.

use super::{
    ActuatorChannel, HardwareFault, HardwarePort, HardwareSnapshot, SensorChannel, SetupFaults, ACTUATOR_CHANNELS,
    MAX_SETUP_FAULTS,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Instant;
use thiserror::Error;

const REV_TO_RAD: f64 = TAU;
const DEFAULT_CURRENT_LIMIT_AMPS: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

/// Vendor motor-controller binding: one instance per controller.
pub trait MotorDriver {
    fn set_current_limit(&mut self, amps: u8) -> Result<(), DriverError>;
    fn position_revolutions(&mut self) -> Result<f64, DriverError>;
    fn set_voltage(&mut self, volts: f64) -> Result<(), DriverError>;
}

pub trait Clock {
    fn now_seconds(&self) -> f64;
}

/// Process-relative monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionConfig {
    pub current_limit_amps: u8,
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            current_limit_amps: DEFAULT_CURRENT_LIMIT_AMPS,
        }
    }
}

pub struct CompetitionPort<D: MotorDriver, C: Clock = MonotonicClock> {
    config: CompetitionConfig,
    left: D,
    right: D,
    clock: C,
}

impl<D: MotorDriver> CompetitionPort<D, MonotonicClock> {
    pub fn new(left: D, right: D, config: CompetitionConfig) -> Self {
        Self::with_clock(left, right, MonotonicClock::new(), config)
    }
}

impl<D: MotorDriver, C: Clock> CompetitionPort<D, C> {
    pub fn with_clock(left: D, right: D, clock: C, config: CompetitionConfig) -> Self {
        Self { config, left, right, clock }
    }

    fn driver(&mut self, channel: ActuatorChannel) -> &mut D {
        match channel {
            ActuatorChannel::LeftDrive => &mut self.left,
            ActuatorChannel::RightDrive => &mut self.right,
        }
    }
}

// One setup fault per motor at most, so the pushes below always fit.
static_assertions::const_assert!(ACTUATOR_CHANNELS <= MAX_SETUP_FAULTS);

impl<D: MotorDriver, C: Clock> HardwarePort for CompetitionPort<D, C> {
    fn setup(&mut self) -> SetupFaults {
        let limit = self.config.current_limit_amps;
        let mut faults = SetupFaults::new();
        for channel in ActuatorChannel::ALL {
            if let Err(error) = self.driver(channel).set_current_limit(limit) {
                let _ = faults.push(HardwareFault::SetupFailed {
                    device: channel.to_string(),
                    reason: error.0,
                });
            }
        }
        faults
    }

    fn update(&mut self) -> Result<HardwareSnapshot, HardwareFault> {
        // Timestamp first so every reading is attributed to the same instant.
        let timestamp = self.clock.now_seconds();
        let left = self
            .left
            .position_revolutions()
            .map_err(|e| HardwareFault::ReadFailed(format!("{}: {}", SensorChannel::LeftEncoder, e)))?;
        let right = self
            .right
            .position_revolutions()
            .map_err(|e| HardwareFault::ReadFailed(format!("{}: {}", SensorChannel::RightEncoder, e)))?;

        Ok(HardwareSnapshot::new(timestamp)
            .with_reading(SensorChannel::LeftEncoder, left * REV_TO_RAD)
            .with_reading(SensorChannel::RightEncoder, right * REV_TO_RAD))
    }

    fn set_actuator(&mut self, channel: ActuatorChannel, volts: f64) -> Result<(), HardwareFault> {
        self.driver(channel)
            .set_voltage(volts)
            .map_err(|e| HardwareFault::WriteFailed { channel, reason: e.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct Controller {
        current_limit: Option<u8>,
        revolutions: f64,
        volts: f64,
        fail_configure: bool,
        fail_read: bool,
    }

    #[derive(Clone, Default)]
    struct FakeDriver(Rc<RefCell<Controller>>);

    impl MotorDriver for FakeDriver {
        fn set_current_limit(&mut self, amps: u8) -> Result<(), DriverError> {
            let mut controller = self.0.borrow_mut();
            if controller.fail_configure {
                return Err(DriverError("firmware mismatch".into()));
            }
            controller.current_limit = Some(amps);
            Ok(())
        }

        fn position_revolutions(&mut self) -> Result<f64, DriverError> {
            let controller = self.0.borrow();
            if controller.fail_read {
                return Err(DriverError("CAN timeout".into()));
            }
            Ok(controller.revolutions)
        }

        fn set_voltage(&mut self, volts: f64) -> Result<(), DriverError> {
            self.0.borrow_mut().volts = volts;
            Ok(())
        }
    }

    struct FakeClock(Cell<f64>);

    impl Clock for FakeClock {
        fn now_seconds(&self) -> f64 {
            self.0.get()
        }
    }

    fn port() -> (FakeDriver, FakeDriver, CompetitionPort<FakeDriver, FakeClock>) {
        let left = FakeDriver::default();
        let right = FakeDriver::default();
        let port = CompetitionPort::with_clock(
            left.clone(),
            right.clone(),
            FakeClock(Cell::new(12.5)),
            CompetitionConfig::default(),
        );
        (left, right, port)
    }

    #[test]
    fn test_setup_applies_current_limit() {
        let (left, right, mut port) = port();
        assert!(port.setup().is_empty());
        assert_eq!(left.0.borrow().current_limit, Some(20));
        assert_eq!(right.0.borrow().current_limit, Some(20));
    }

    #[test]
    fn test_setup_failure_does_not_skip_other_devices() {
        let (left, right, mut port) = port();
        left.0.borrow_mut().fail_configure = true;

        let faults = port.setup();
        assert_eq!(faults.len(), 1);
        assert!(matches!(&faults[0], HardwareFault::SetupFailed { device, .. } if device == "left drive"));
        assert_eq!(right.0.borrow().current_limit, Some(20));
    }

    #[test]
    fn test_update_converts_revolutions_to_radians() {
        let (left, right, mut port) = port();
        left.0.borrow_mut().revolutions = 1.0;
        right.0.borrow_mut().revolutions = 0.5;

        let snapshot = port.update().unwrap();
        assert_eq!(snapshot.timestamp, 12.5);
        assert!((snapshot.left_encoder_radians() - TAU).abs() < 1e-12);
        assert!((snapshot.right_encoder_radians() - TAU / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_read_failure_names_channel() {
        let (_left, right, mut port) = port();
        right.0.borrow_mut().fail_read = true;

        match port.update() {
            Err(HardwareFault::ReadFailed(message)) => assert!(message.starts_with("right encoder")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_voltage_written_through() {
        let (left, _right, mut port) = port();
        port.set_actuator(ActuatorChannel::LeftDrive, 6.0).unwrap();
        assert_eq!(left.0.borrow().volts, 6.0);
    }
}
