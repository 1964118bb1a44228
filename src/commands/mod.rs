pub mod drive;

pub use drive::{DriveDistance, TankDrive};
