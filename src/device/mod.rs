//! Simulated device: identity, property bag, pause gate and the runtime
//! driving its telemetry and command loops

mod context;
mod identity;
mod pause;
pub mod properties;
mod runtime;

pub use context::DeviceContext;
#[cfg(test)]
pub(crate) use context::test_context;
pub use identity::DeviceIdentity;
pub use pause::{GateClosed, PauseGate};
pub use properties::DeviceProperties;
pub use runtime::{DeviceError, DeviceParts, DeviceRuntime};
