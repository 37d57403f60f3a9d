//! PingDevice command handler

use crate::command::{CommandHandler, CommandProcessingResult, HandlerError};
use crate::device::DeviceContext;
use async_trait::async_trait;
use simulator_shared::CommandEnvelope;
use tracing::info;

/// Answers `PingDevice`; takes no parameters
pub struct PingDeviceHandler;

#[async_trait]
impl CommandHandler for PingDeviceHandler {
    fn command_name(&self) -> &'static str {
        "PingDevice"
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        _command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        info!("[PING] {} pinged", device.device_id());
        Ok(CommandProcessingResult::Success)
    }
}
