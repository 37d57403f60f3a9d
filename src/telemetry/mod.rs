//! Telemetry producers run by a device's send loop

pub mod concrete;
pub mod remote_monitor;
pub mod sample_data;
mod traits;

pub use concrete::{ConcreteTelemetry, Repeat};
pub use remote_monitor::RemoteMonitorTelemetry;
pub use sample_data::{RandomSource, SampleDataError, SampleDataGenerator};
pub use traits::{sleep_or_cancel, EventSink, TelemetryController, TelemetryEvent};
