//! Simulator configuration

use simulator_shared::timing;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Host name assigned to devices that do not carry their own
    pub host_name: String,
    /// JSON file holding the desired device list
    pub registry_path: PathBuf,
    /// How often the reconciler re-reads the registry
    pub device_poll_interval: Duration,
    /// How long a stop request waits for one device task
    pub stop_timeout: Duration,
    pub device: DeviceTimings,
    pub dm: DmTimings,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".into(),
            registry_path: PathBuf::from("devices.json"),
            device_poll_interval: Duration::from_secs(timing::DEVICE_POLL_INTERVAL_SECS),
            stop_timeout: Duration::from_secs(timing::DEVICE_STOP_TIMEOUT_SECS),
            device: DeviceTimings::default(),
            dm: DmTimings::default(),
        }
    }
}

/// Per-device loop timings
#[derive(Debug, Clone)]
pub struct DeviceTimings {
    /// Delay before each receive attempt
    pub receive_poll_interval: Duration,
    /// Pause after each full pass over the telemetry list
    pub report_interval: Duration,
    /// Interval between remote-monitor telemetry samples
    pub telemetry_interval: Duration,
    /// Keep looping over the telemetry list instead of stopping after one pass
    pub repeat_event_list_forever: bool,
}

impl Default for DeviceTimings {
    fn default() -> Self {
        Self {
            receive_poll_interval: Duration::from_secs(timing::RECEIVE_POLL_INTERVAL_SECS),
            report_interval: Duration::from_secs(timing::REPORT_INTERVAL_SECS),
            telemetry_interval: Duration::from_secs(timing::TELEMETRY_INTERVAL_SECS),
            repeat_event_list_forever: true,
        }
    }
}

/// Device-management task step durations
#[derive(Debug, Clone)]
pub struct DmTimings {
    pub firmware_step: Duration,
    pub configuration_step: Duration,
}

impl Default for DmTimings {
    fn default() -> Self {
        Self {
            firmware_step: Duration::from_secs(timing::FIRMWARE_STEP_SECS),
            configuration_step: Duration::from_secs(timing::CONFIGURATION_STEP_SECS),
        }
    }
}
