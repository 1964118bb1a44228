//! # Robocycle
//!
//! A cooperative, single-threaded command scheduler for robot control loops,
//! with a hardware abstraction layer that reads every sensor once per cycle.
//!
//! ## Features
//!
//! - **Snapshot-per-cycle HAL**: one platform read per cycle, shared by every consumer
//! - **Subsystems**: exclusive owners of actuator channels
//! - **Commands**: `initialize` / `execute` / `is_finished` / `end` lifecycle with
//!   exclusive subsystem requirements
//! - **Conflict resolution**: newer commands interrupt holders in submission order
//! - **Default commands**: rebuilt whenever a subsystem goes idle
//! - **Fault tolerance**: hardware and command faults are logged, never fatal
//! - **Bounded memory**: fixed-capacity queues and fault history
//!
//! ## Quick Start
//!
//! ```rust
//! use robocycle::commands::DriveDistance;
//! use robocycle::hal::{DrivetrainModel, Hal, SimulatedPort};
//! use robocycle::subsystems::{DriveConfig, DriveSubsystem};
//! use robocycle::Scheduler;
//!
//! let hal = Hal::new(SimulatedPort::with_model(DrivetrainModel::default()));
//! let mut scheduler = Scheduler::new(hal.clone());
//! let drive = scheduler.register(DriveSubsystem::new(hal, DriveConfig::default()))?;
//! scheduler.setup()?;
//!
//! scheduler.schedule(DriveDistance::new(drive.clone(), 6.0, 6.0))?;
//! while scheduler.running_count() + scheduler.pending_count() > 0 {
//!     scheduler.run_cycle();
//! }
//! assert!(drive.borrow().left_position_inches() >= 6.0);
//! # Ok::<(), robocycle::SchedulerError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`hal`] - Hardware port trait, snapshot cache and the three port variants
//! - [`fault_injection`] - Port decorator that injects read and write faults
//! - [`subsystems`] - Subsystem trait, handles and the drivetrain
//! - [`command`] - Command trait and lifecycle
//! - [`commands`] - Drivetrain commands
//! - [`scheduler`] - Per-cycle algorithm and conflict resolution
//! - [`fault`] - Fault log and diagnostics
//! - [`telemetry`] - Serializable per-cycle frames

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod command;
pub mod commands;
pub mod fault;
pub mod fault_injection;
pub mod hal;
pub mod scheduler;
pub mod subsystems;
pub mod telemetry;

pub use command::{Command, CommandError, CommandId, CommandState, EndReason, InterruptionBehavior};
pub use fault::{Diagnostics, FaultKind, FaultLog, FaultRecord};
pub use hal::{ActuatorChannel, Hal, HardwareFault, HardwarePort, HardwareSnapshot, SensorChannel};
pub use scheduler::{CycleReport, Scheduler, SchedulerConfig, SchedulerError};
pub use subsystems::{Subsystem, SubsystemHandle, SubsystemId, SubsystemSet};
pub use telemetry::TelemetryFrame;
