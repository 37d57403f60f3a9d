//! Simulated IoT device fleet
//!
//! Each device runs a telemetry send loop and a command receive loop against a
//! pluggable [`transport::Transport`]. The [`fleet`] module keeps the running
//! set of devices in line with a device registry.

pub mod command;
pub mod config;
pub mod device;
pub mod dm;
pub mod fleet;
pub mod telemetry;
pub mod transport;

pub use config::{DeviceTimings, DmTimings, SimulatorConfig};
pub use device::{DeviceContext, DeviceError, DeviceIdentity, DeviceRuntime};
pub use fleet::{FleetManager, FleetReconciler, ReconcileReport};
