//! Fleet supervision
//!
//! This module handles:
//! - Reading the desired device list from a registry
//! - Building cooler devices for new registry entries
//! - Running one supervised task per device and stopping removed ones

pub mod factory;
mod manager;
mod reconciler;
pub mod registry;

pub use factory::{CoolerDeviceFactory, DeviceFactory};
pub use manager::FleetManager;
pub use reconciler::{FleetReconciler, ReconcileReport};
pub use registry::{
    DeviceRegistry, InitialDeviceConfig, JsonFileRegistry, RegistryError, StaticDeviceRegistry,
};
