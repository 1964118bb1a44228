use crate::command::{Command, CommandError};
use crate::subsystems::{DriveSubsystem, SubsystemHandle, SubsystemSet};
use tracing::debug;

// Write faults inside these commands are not escalated: the HAL has already
// queued them for the fault log, and the next cycle writes again.

/// Drives both sides at a fixed voltage until the left side reaches an
/// absolute position.
///
/// Cleanup: both outputs are zeroed on every exit path, natural or not.
#[derive(Debug)]
pub struct DriveDistance {
    drive: SubsystemHandle<DriveSubsystem>,
    volts: f64,
    target_inches: f64,
}

impl DriveDistance {
    pub fn new(drive: SubsystemHandle<DriveSubsystem>, volts: f64, target_inches: f64) -> Self {
        Self {
            drive,
            volts,
            target_inches,
        }
    }
}

impl Command for DriveDistance {
    fn name(&self) -> &str {
        "drive distance"
    }

    fn requirements(&self) -> SubsystemSet {
        SubsystemSet::of(self.drive.id())
    }

    fn initialize(&mut self) -> Result<(), CommandError> {
        debug!(
            "driving at {} V until left side reaches {} in (now {} in)",
            self.volts,
            self.target_inches,
            self.drive.try_borrow()?.left_position_inches()
        );
        Ok(())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        let _ = self.drive.try_borrow_mut()?.tank_drive(self.volts, self.volts);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.drive
            .try_borrow()
            .map_or(false, |drive| drive.left_position_inches() >= self.target_inches)
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        debug!(interrupted, "drive distance ended");
        let _ = self.drive.try_borrow_mut()?.stop();
        Ok(())
    }
}

/// Open-loop constant voltage per side. Never finishes on its own.
///
/// Cleanup: outputs are zeroed when interrupted. `TankDrive::stopped` makes a
/// good default command for the drivetrain.
#[derive(Debug)]
pub struct TankDrive {
    drive: SubsystemHandle<DriveSubsystem>,
    left_volts: f64,
    right_volts: f64,
}

impl TankDrive {
    pub fn new(drive: SubsystemHandle<DriveSubsystem>, left_volts: f64, right_volts: f64) -> Self {
        Self {
            drive,
            left_volts,
            right_volts,
        }
    }

    pub fn stopped(drive: SubsystemHandle<DriveSubsystem>) -> Self {
        Self::new(drive, 0.0, 0.0)
    }
}

impl Command for TankDrive {
    fn name(&self) -> &str {
        "tank drive"
    }

    fn requirements(&self) -> SubsystemSet {
        SubsystemSet::of(self.drive.id())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        let _ = self.drive.try_borrow_mut()?.tank_drive(self.left_volts, self.right_volts);
        Ok(())
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        if interrupted {
            let _ = self.drive.try_borrow_mut()?.stop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{ActuatorChannel, Hal, ScriptedPort, SensorChannel};
    use crate::subsystems::{DriveConfig, SubsystemId};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn handle() -> (ScriptedPort, Hal, SubsystemHandle<DriveSubsystem>) {
        let port = ScriptedPort::new();
        let hal = Hal::new(port.clone());
        let drive = DriveSubsystem::new(hal.clone(), DriveConfig::default());
        let handle = SubsystemHandle::new(SubsystemId::new(0), Rc::new(RefCell::new(drive)));
        (port, hal, handle)
    }

    #[test]
    fn test_drive_distance_threshold() {
        let (port, hal, drive) = handle();
        let command = DriveDistance::new(drive, 6.0, 6.0);

        port.set_reading(SensorChannel::LeftEncoder, 2.99);
        hal.update().unwrap();
        assert!(!command.is_finished());

        port.set_reading(SensorChannel::LeftEncoder, 3.0);
        hal.update().unwrap();
        assert!(command.is_finished());
    }

    #[test]
    fn test_drive_distance_zeroes_on_both_exits() {
        for interrupted in [false, true] {
            let (port, _hal, drive) = handle();
            let mut command = DriveDistance::new(drive, 6.0, 6.0);
            command.execute().unwrap();
            assert_eq!(port.last_write(ActuatorChannel::LeftDrive), Some(6.0));

            command.end(interrupted).unwrap();
            assert_eq!(port.last_write(ActuatorChannel::LeftDrive), Some(0.0));
            assert_eq!(port.last_write(ActuatorChannel::RightDrive), Some(0.0));
        }
    }

    #[test]
    fn test_tank_drive_keeps_output_on_natural_end() {
        let (port, _hal, drive) = handle();
        let mut command = TankDrive::new(drive, 2.0, 4.0);
        command.execute().unwrap();

        command.end(false).unwrap();
        assert_eq!(port.last_write(ActuatorChannel::RightDrive), Some(4.0));

        command.end(true).unwrap();
        assert_eq!(port.last_write(ActuatorChannel::RightDrive), Some(0.0));
    }

    #[test]
    fn test_busy_drive_fails_instead_of_panicking() {
        let (port, _hal, drive) = handle();
        let id = drive.id();
        let mut command = DriveDistance::new(drive.clone(), 6.0, 6.0);

        let held = drive.borrow();
        assert_eq!(command.execute(), Err(CommandError::SubsystemBusy(id)));
        assert_eq!(command.end(true), Err(CommandError::SubsystemBusy(id)));
        assert!(port.writes().is_empty());
        drop(held);

        let held = drive.borrow_mut();
        assert!(!command.is_finished());
        drop(held);
    }

    #[test]
    fn test_requirements_name_the_drive() {
        let (_port, _hal, drive) = handle();
        let id = drive.id();
        assert!(TankDrive::stopped(drive).requirements().contains(id));
    }
}
