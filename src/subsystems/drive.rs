use super::Subsystem;
use crate::hal::{ActuatorChannel, Hal, HardwareFault, HardwareSnapshot};
use serde::{Deserialize, Serialize};

const DEFAULT_WHEEL_RADIUS_IN: f64 = 2.0; // 4 inch wheels

const DRIVE_ACTUATORS: [ActuatorChannel; 2] = [ActuatorChannel::LeftDrive, ActuatorChannel::RightDrive];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriveConfig {
    pub wheel_radius_in: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            wheel_radius_in: DEFAULT_WHEEL_RADIUS_IN,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveOdometry {
    pub left_inches: f64,
    pub right_inches: f64,
    pub average_inches: f64,
    pub left_velocity_ips: f64,
    pub right_velocity_ips: f64,
    /// Snapshot these values were computed from.
    pub sequence: u64,
}

/// Two-sided skid-steer drivetrain.
#[derive(Debug)]
pub struct DriveSubsystem {
    hal: Hal,
    config: DriveConfig,
    odometry: DriveOdometry,
    last_seen: Option<HardwareSnapshot>,
}

impl DriveSubsystem {
    pub fn new(hal: Hal, config: DriveConfig) -> Self {
        Self {
            hal,
            config,
            odometry: DriveOdometry::default(),
            last_seen: None,
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    // s = r * theta
    pub fn left_position_inches(&self) -> f64 {
        self.hal.snapshot().left_encoder_radians() * self.config.wheel_radius_in
    }

    pub fn right_position_inches(&self) -> f64 {
        self.hal.snapshot().right_encoder_radians() * self.config.wheel_radius_in
    }

    pub fn odometry(&self) -> DriveOdometry {
        self.odometry
    }

    /// Both sides are written even when the first write fails.
    ///
    /// # Errors
    /// The first write fault, which the HAL has already queued for the
    /// scheduler's fault log.
    pub fn tank_drive(&mut self, left_volts: f64, right_volts: f64) -> Result<(), HardwareFault> {
        let left = self.hal.set_actuator(ActuatorChannel::LeftDrive, left_volts);
        let right = self.hal.set_actuator(ActuatorChannel::RightDrive, right_volts);
        left.and(right)
    }

    /// # Errors
    /// See [`DriveSubsystem::tank_drive`].
    pub fn stop(&mut self) -> Result<(), HardwareFault> {
        self.tank_drive(0.0, 0.0)
    }

    pub fn output_volts(&self) -> (Option<f64>, Option<f64>) {
        (
            self.hal.output(ActuatorChannel::LeftDrive),
            self.hal.output(ActuatorChannel::RightDrive),
        )
    }
}

impl Subsystem for DriveSubsystem {
    fn name(&self) -> &'static str {
        "drive"
    }

    fn actuators(&self) -> &[ActuatorChannel] {
        &DRIVE_ACTUATORS
    }

    fn periodic(&mut self) {
        let snapshot = self.hal.snapshot();
        let left = snapshot.left_encoder_radians() * self.config.wheel_radius_in;
        let right = snapshot.right_encoder_radians() * self.config.wheel_radius_in;

        // A repeated sequence means the read failed; velocity stays as it was.
        if let Some(previous) = self.last_seen.filter(|prev| prev.sequence != snapshot.sequence) {
            let dt = snapshot.timestamp - previous.timestamp;
            if dt > 0.0 {
                self.odometry.left_velocity_ips = (left - self.odometry.left_inches) / dt;
                self.odometry.right_velocity_ips = (right - self.odometry.right_inches) / dt;
            }
        }

        self.odometry.left_inches = left;
        self.odometry.right_inches = right;
        self.odometry.average_inches = (left + right) / 2.0;
        self.odometry.sequence = snapshot.sequence;
        self.last_seen = Some(snapshot);
    }
}
