//! ChangeDeviceState command handler

use crate::command::{display_parameter, CommandHandler, CommandProcessingResult, HandlerError};
use crate::device::DeviceContext;
use async_trait::async_trait;
use simulator_shared::CommandEnvelope;
use tracing::info;

/// Sets `DeviceState` and announces the change with a device info event
pub struct ChangeDeviceStateHandler;

#[async_trait]
impl CommandHandler for ChangeDeviceStateHandler {
    fn command_name(&self) -> &'static str {
        "ChangeDeviceState"
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(state) = display_parameter(command, "DeviceState") else {
            return Ok(CommandProcessingResult::RetryLater);
        };

        device
            .properties()
            .write()
            .await
            .set_device_state(state.clone());
        device.send_device_info().await?;

        info!("[DEVICE] {} in {} state", device.device_id(), state);
        Ok(CommandProcessingResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_context;
    use simulator_shared::EventKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_state_change_sends_device_info() {
        let (ctx, hub) = test_context(None);
        let command = CommandEnvelope::new("ChangeDeviceState").with_parameter("DeviceState", "maintenance");

        let result = ChangeDeviceStateHandler.handle(&ctx, &command).await.unwrap();
        assert_eq!(result, CommandProcessingResult::Success);
        assert_eq!(ctx.properties().read().await.device_state(), Some("maintenance"));

        let event = hub
            .next_event(ctx.device_id(), Duration::from_millis(200))
            .await
            .unwrap()
            .expect("device info event");
        assert_eq!(event.event_kind(), EventKind::DeviceInfo);
        assert_eq!(event.fields["DeviceState"].as_str(), Some("maintenance"));
    }

    #[tokio::test]
    async fn test_missing_state_retries_later() {
        let (ctx, _hub) = test_context(None);
        let result = ChangeDeviceStateHandler
            .handle(&ctx, &CommandEnvelope::new("ChangeDeviceState"))
            .await
            .unwrap();
        assert_eq!(result, CommandProcessingResult::RetryLater);
        assert_eq!(ctx.properties().read().await.device_state(), Some("normal"));
    }
}
