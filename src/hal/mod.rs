//! Hardware abstraction layer.
//!
//! Every platform (real robot, simulator, test double) implements
//! [`HardwarePort`]. The control core never talks to a port directly; it goes
//! through a [`Hal`] handle, which reads the platform once per cycle, caches
//! the resulting [`HardwareSnapshot`] and forwards actuator writes.

pub mod competition;
pub mod scripted;
pub mod simulated;

pub use competition::{Clock, CompetitionConfig, CompetitionPort, DriverError, MonotonicClock, MotorDriver};
pub use scripted::{ScriptedFrame, ScriptedPort};
pub use simulated::{DrivetrainModel, SimulatedPort, SimulationConfig};

use core::fmt;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

pub const SENSOR_CHANNELS: usize = 2;
pub const ACTUATOR_CHANNELS: usize = 2;
pub const MAX_SETUP_FAULTS: usize = 8;
pub const MAX_PENDING_FAULTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorChannel {
    LeftEncoder,
    RightEncoder,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; SENSOR_CHANNELS] = [Self::LeftEncoder, Self::RightEncoder];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorChannel::LeftEncoder => write!(f, "left encoder"),
            SensorChannel::RightEncoder => write!(f, "right encoder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorChannel {
    LeftDrive,
    RightDrive,
}

impl ActuatorChannel {
    pub const ALL: [ActuatorChannel; ACTUATOR_CHANNELS] = [Self::LeftDrive, Self::RightDrive];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ActuatorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorChannel::LeftDrive => write!(f, "left drive"),
            ActuatorChannel::RightDrive => write!(f, "right drive"),
        }
    }
}

/// Immutable readout of every sensor for one cycle.
///
/// Encoder readings are in radians and the timestamp in monotonic seconds.
/// `sequence` counts successful reads; two consumers that see the same
/// sequence saw the same snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    pub timestamp: f64,
    pub sequence: u64,
    readings: [Option<f64>; SENSOR_CHANNELS],
}

impl HardwareSnapshot {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            sequence: 0,
            readings: [None; SENSOR_CHANNELS],
        }
    }

    #[must_use]
    pub fn with_reading(mut self, channel: SensorChannel, value: f64) -> Self {
        self.readings[channel.index()] = Some(value);
        self
    }

    pub fn reading(&self, channel: SensorChannel) -> Option<f64> {
        self.readings[channel.index()]
    }

    pub fn readings(&self) -> impl Iterator<Item = (SensorChannel, f64)> + '_ {
        SensorChannel::ALL
            .iter()
            .filter_map(move |&channel| self.reading(channel).map(|value| (channel, value)))
    }

    pub fn left_encoder_radians(&self) -> f64 {
        self.reading(SensorChannel::LeftEncoder).unwrap_or(0.0)
    }

    pub fn right_encoder_radians(&self) -> f64 {
        self.reading(SensorChannel::RightEncoder).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareFault {
    #[error("sensor read failed: {0}")]
    ReadFailed(String),

    #[error("write to {channel} failed: {reason}")]
    WriteFailed { channel: ActuatorChannel, reason: String },

    #[error("configuring {device} failed: {reason}")]
    SetupFailed { device: String, reason: String },

    #[error("invalid {channel} reading: {value}")]
    InvalidReading { channel: SensorChannel, value: f64 },

    #[error("timestamp went backwards: {previous} -> {current}")]
    NonMonotonicTimestamp { previous: f64, current: f64 },

    #[error("invalid output for {channel}: {volts} V")]
    InvalidOutput { channel: ActuatorChannel, volts: f64 },

    #[error("hardware already configured")]
    AlreadyConfigured,
}

pub type SetupFaults = Vec<HardwareFault, MAX_SETUP_FAULTS>;

/// Platform boundary. Implementations only proxy I/O and convert native units
/// to radians/volts; they never apply mechanism geometry.
pub trait HardwarePort {
    /// One-time device configuration. Every device is attempted; the faults
    /// of those that failed are returned.
    fn setup(&mut self) -> SetupFaults;

    /// Read the timestamp and every sensor for a single instant.
    /// Must not touch actuators.
    fn update(&mut self) -> Result<HardwareSnapshot, HardwareFault>;

    /// Apply an output immediately.
    fn set_actuator(&mut self, channel: ActuatorChannel, volts: f64) -> Result<(), HardwareFault>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalStats {
    pub updates: u64,
    pub read_faults: u64,
    pub writes: u64,
    pub write_faults: u64,
    pub setup_faults: u32,
}

struct HalState {
    port: Box<dyn HardwarePort>,
    snapshot: HardwareSnapshot,
    outputs: [Option<f64>; ACTUATOR_CHANNELS],
    configured: bool,
    stats: HalStats,
    pending_faults: Vec<HardwareFault, MAX_PENDING_FAULTS>,
    dropped_faults: u32,
}

/// Write faults raised since the last drain.
#[derive(Debug, Default)]
pub(crate) struct PendingFaults {
    pub(crate) faults: Vec<HardwareFault, MAX_PENDING_FAULTS>,
    /// Oldest faults evicted because the queue was full.
    pub(crate) dropped: u32,
}

impl HalState {
    fn push_fault(&mut self, fault: HardwareFault) {
        if self.pending_faults.is_full() {
            self.pending_faults.remove(0);
            self.dropped_faults = self.dropped_faults.saturating_add(1);
        }
        let _ = self.pending_faults.push(fault);
    }

    fn validate(&self, snapshot: &HardwareSnapshot) -> Result<(), HardwareFault> {
        if !snapshot.timestamp.is_finite() || (self.stats.updates > 0 && snapshot.timestamp < self.snapshot.timestamp) {
            return Err(HardwareFault::NonMonotonicTimestamp {
                previous: self.snapshot.timestamp,
                current: snapshot.timestamp,
            });
        }
        if let Some((channel, value)) = snapshot.readings().find(|(_, value)| !value.is_finite()) {
            return Err(HardwareFault::InvalidReading { channel, value });
        }
        Ok(())
    }
}

/// Shared handle to the one hardware port of the process.
///
/// Cloning is cheap; every subsystem keeps its own clone. The handle is
/// `!Send`, which confines all control state to the thread that built it.
#[derive(Clone)]
pub struct Hal {
    inner: Rc<RefCell<HalState>>,
}

impl Hal {
    pub fn new<P: HardwarePort + 'static>(port: P) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HalState {
                port: Box::new(port),
                snapshot: HardwareSnapshot::default(),
                outputs: [None; ACTUATOR_CHANNELS],
                configured: false,
                stats: HalStats::default(),
                pending_faults: Vec::new(),
                dropped_faults: 0,
            })),
        }
    }

    /// Configure the platform. Only the first call reaches the port.
    ///
    /// # Errors
    /// `HardwareFault::AlreadyConfigured` on any call after the first.
    pub fn setup(&self) -> Result<SetupFaults, HardwareFault> {
        let mut state = self.inner.borrow_mut();
        if state.configured {
            return Err(HardwareFault::AlreadyConfigured);
        }
        state.configured = true;

        let faults = state.port.setup();
        for fault in &faults {
            warn!("hardware setup: {}", fault);
        }
        state.stats.setup_faults = faults.len() as u32;
        Ok(faults)
    }

    pub fn is_configured(&self) -> bool {
        self.inner.borrow().configured
    }

    /// Read the platform once. On failure the previous snapshot stays current.
    pub(crate) fn update(&self) -> Result<HardwareSnapshot, HardwareFault> {
        let mut state = self.inner.borrow_mut();
        let read = state.port.update().and_then(|snapshot| {
            state.validate(&snapshot)?;
            Ok(snapshot)
        });

        match read {
            Ok(mut snapshot) => {
                state.stats.updates += 1;
                snapshot.sequence = state.stats.updates;
                state.snapshot = snapshot;
                Ok(snapshot)
            }
            Err(fault) => {
                state.stats.read_faults += 1;
                debug!("keeping snapshot #{} after read fault", state.snapshot.sequence);
                Err(fault)
            }
        }
    }

    /// The snapshot produced by the last successful read. No platform access.
    pub fn snapshot(&self) -> HardwareSnapshot {
        self.inner.borrow().snapshot
    }

    /// Write-through actuator output. Failures are also queued for the
    /// scheduler's fault log, so callers may ignore the result.
    ///
    /// # Errors
    /// `InvalidOutput` for non-finite voltages, or the platform's write fault.
    pub fn set_actuator(&self, channel: ActuatorChannel, volts: f64) -> Result<(), HardwareFault> {
        let mut state = self.inner.borrow_mut();
        let result = if volts.is_finite() {
            state.port.set_actuator(channel, volts)
        } else {
            Err(HardwareFault::InvalidOutput { channel, volts })
        };

        match result {
            Ok(()) => {
                state.stats.writes += 1;
                state.outputs[channel.index()] = Some(volts);
                Ok(())
            }
            Err(fault) => {
                state.stats.write_faults += 1;
                state.push_fault(fault.clone());
                Err(fault)
            }
        }
    }

    /// Last voltage successfully applied to `channel`.
    pub fn output(&self, channel: ActuatorChannel) -> Option<f64> {
        self.inner.borrow().outputs[channel.index()]
    }

    pub fn stats(&self) -> HalStats {
        self.inner.borrow().stats
    }

    pub(crate) fn take_faults(&self) -> PendingFaults {
        let mut state = self.inner.borrow_mut();
        PendingFaults {
            faults: core::mem::take(&mut state.pending_faults),
            dropped: core::mem::take(&mut state.dropped_faults),
        }
    }
}

impl fmt::Debug for Hal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Hal")
            .field("snapshot", &state.snapshot)
            .field("outputs", &state.outputs)
            .field("stats", &state.stats)
            .finish_non_exhaustive()
    }
}
