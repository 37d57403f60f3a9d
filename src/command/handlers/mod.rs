//! Command handlers for the cooler command set

mod device_management;
mod device_state;
mod ping;
mod telemetry;

pub use device_management::{ConfigurationUpdateHandler, FirmwareUpdateHandler};
pub use device_state::ChangeDeviceStateHandler;
pub use ping::PingDeviceHandler;
pub use telemetry::{
    ChangeSetPointTempHandler, DiagnosticTelemetryHandler, StartTelemetryHandler,
    StopTelemetryHandler,
};

use super::CommandHandler;

/// Every cooler handler, in priority order
pub fn cooler_handlers() -> Vec<Box<dyn CommandHandler>> {
    vec![
        Box::new(PingDeviceHandler),
        Box::new(StartTelemetryHandler),
        Box::new(StopTelemetryHandler),
        Box::new(DiagnosticTelemetryHandler),
        Box::new(ChangeSetPointTempHandler),
        Box::new(ChangeDeviceStateHandler),
        Box::new(FirmwareUpdateHandler),
        Box::new(ConfigurationUpdateHandler),
    ]
}
