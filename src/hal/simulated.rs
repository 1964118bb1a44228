use super::{ActuatorChannel, HardwareFault, HardwarePort, HardwareSnapshot, SensorChannel, SetupFaults, ACTUATOR_CHANNELS};
use serde::{Deserialize, Serialize};

const DEFAULT_PERIOD_S: f64 = 0.02;
const DEFAULT_RAD_PER_VOLT_SECOND: f64 = 0.5;

/// First-order drivetrain: wheel speed proportional to applied voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrivetrainModel {
    pub rad_per_volt_second: f64,
}

impl Default for DrivetrainModel {
    fn default() -> Self {
        Self {
            rad_per_volt_second: DEFAULT_RAD_PER_VOLT_SECOND,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub period_s: f64,
    /// Without a model every encoder reads zero.
    pub model: Option<DrivetrainModel>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            period_s: DEFAULT_PERIOD_S,
            model: None,
        }
    }
}

/// Simulation platform. The clock advances one period per read and encoders
/// integrate the voltages applied during the previous period.
#[derive(Debug)]
pub struct SimulatedPort {
    config: SimulationConfig,
    time_s: f64,
    positions_rad: [f64; ACTUATOR_CHANNELS],
    outputs_volts: [f64; ACTUATOR_CHANNELS],
}

impl SimulatedPort {
    pub fn new() -> Self {
        Self::new_with_config(SimulationConfig::default())
    }

    pub fn new_with_config(config: SimulationConfig) -> Self {
        Self {
            config,
            time_s: 0.0,
            positions_rad: [0.0; ACTUATOR_CHANNELS],
            outputs_volts: [0.0; ACTUATOR_CHANNELS],
        }
    }

    pub fn with_model(model: DrivetrainModel) -> Self {
        Self::new_with_config(SimulationConfig {
            model: Some(model),
            ..SimulationConfig::default()
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn encoder_position(&self, channel: SensorChannel) -> f64 {
        match channel {
            SensorChannel::LeftEncoder => self.positions_rad[ActuatorChannel::LeftDrive.index()],
            SensorChannel::RightEncoder => self.positions_rad[ActuatorChannel::RightDrive.index()],
        }
    }
}

impl Default for SimulatedPort {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwarePort for SimulatedPort {
    fn setup(&mut self) -> SetupFaults {
        SetupFaults::new()
    }

    fn update(&mut self) -> Result<HardwareSnapshot, HardwareFault> {
        let period = self.config.period_s;
        if let Some(model) = self.config.model {
            for (position, volts) in self.positions_rad.iter_mut().zip(self.outputs_volts.iter()) {
                *position += volts * model.rad_per_volt_second * period;
            }
        }
        self.time_s += period;

        let mut snapshot = HardwareSnapshot::new(self.time_s);
        for channel in SensorChannel::ALL {
            snapshot = snapshot.with_reading(channel, self.encoder_position(channel));
        }
        Ok(snapshot)
    }

    fn set_actuator(&mut self, channel: ActuatorChannel, volts: f64) -> Result<(), HardwareFault> {
        self.outputs_volts[channel.index()] = volts;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_without_model() {
        let mut port = SimulatedPort::new();
        port.set_actuator(ActuatorChannel::LeftDrive, 12.0).unwrap();

        let snapshot = port.update().unwrap();
        assert_eq!(snapshot.left_encoder_radians(), 0.0);
        assert_eq!(snapshot.right_encoder_radians(), 0.0);
        assert!((snapshot.timestamp - DEFAULT_PERIOD_S).abs() < 1e-12);
    }

    #[test]
    fn test_model_integrates_voltage() {
        let mut port = SimulatedPort::with_model(DrivetrainModel { rad_per_volt_second: 1.0 });
        port.set_actuator(ActuatorChannel::LeftDrive, 5.0).unwrap();
        port.set_actuator(ActuatorChannel::RightDrive, -5.0).unwrap();

        let mut snapshot = HardwareSnapshot::default();
        for _ in 0..10 {
            snapshot = port.update().unwrap();
        }

        // 5 V * 1 rad/(V s) * 0.2 s
        assert!((snapshot.left_encoder_radians() - 1.0).abs() < 1e-9);
        assert!((snapshot.right_encoder_radians() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_setup_never_fails() {
        let mut port = SimulatedPort::new();
        assert!(port.setup().is_empty());
    }
}
