//! FirmwareUpdate and ConfigurationUpdate command handlers
//!
//! Both start a DM task in the background and acknowledge right away. A
//! device runs one DM task at a time; a second request while one is active
//! is abandoned so it can be retried once the device is free.

use crate::command::{text_parameter, CommandHandler, CommandProcessingResult, HandlerError};
use crate::device::DeviceContext;
use crate::dm::{configuration, firmware, ConfigurationUpdate, DmTaskDefinition, DmTaskError, FirmwareUpdate};
use async_trait::async_trait;
use simulator_shared::CommandEnvelope;
use tracing::{info, warn};

fn into_handler_error(error: DmTaskError) -> HandlerError {
    match error {
        DmTaskError::InvalidUri(reason) => HandlerError::InvalidParameter(reason),
        other => HandlerError::Device(other.into()),
    }
}

/// Start a DM task unless the device is busy with another one
async fn start(device: &DeviceContext, definition: DmTaskDefinition) -> CommandProcessingResult {
    let name = definition.name;
    if device.start_dm_task(definition).await {
        info!("[DM] {} accepted {}", device.device_id(), name);
        CommandProcessingResult::Success
    } else {
        warn!("[DM] {} is busy, {} must retry later", device.device_id(), name);
        CommandProcessingResult::RetryLater
    }
}

/// Handle FirmwareUpdate command (`FwPackageUri`: text)
pub struct FirmwareUpdateHandler;

#[async_trait]
impl CommandHandler for FirmwareUpdateHandler {
    fn command_name(&self) -> &'static str {
        firmware::COMMAND_NAME
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(uri) = text_parameter(command, firmware::URI_PARAMETER)? else {
            return Ok(CommandProcessingResult::RetryLater);
        };
        let definition = FirmwareUpdate::definition(uri, device.dm_timings().firmware_step)
            .map_err(into_handler_error)?;
        Ok(start(device, definition).await)
    }
}

/// Handle ConfigurationUpdate command (`ConfigUri`: text)
pub struct ConfigurationUpdateHandler;

#[async_trait]
impl CommandHandler for ConfigurationUpdateHandler {
    fn command_name(&self) -> &'static str {
        configuration::COMMAND_NAME
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(uri) = text_parameter(command, configuration::URI_PARAMETER)? else {
            return Ok(CommandProcessingResult::RetryLater);
        };
        let definition = ConfigurationUpdate::definition(uri, device.dm_timings().configuration_step)
            .map_err(into_handler_error)?;
        Ok(start(device, definition).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_context;
    use crate::dm::DmOutcome;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_update_while_busy_retries_later() {
        let (ctx, _hub) = test_context(None);
        let first = CommandEnvelope::new("FirmwareUpdate")
            .with_parameter("FwPackageUri", "https://fw.example.com/3.0");
        let second = CommandEnvelope::new("ConfigurationUpdate")
            .with_parameter("ConfigUri", "https://cfg.example.com/configuration/v2");

        assert_eq!(
            FirmwareUpdateHandler.handle(&ctx, &first).await.unwrap(),
            CommandProcessingResult::Success
        );
        assert_eq!(
            ConfigurationUpdateHandler.handle(&ctx, &second).await.unwrap(),
            CommandProcessingResult::RetryLater
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), ctx.wait_dm_task())
            .await
            .expect("dm task should finish");
        assert_eq!(outcome, Some(DmOutcome::Completed));
        assert_eq!(ctx.properties().read().await.firmware_version(), Some("3.0"));

        // free again once the first task is done
        assert_eq!(
            ConfigurationUpdateHandler.handle(&ctx, &second).await.unwrap(),
            CommandProcessingResult::Success
        );
        ctx.wait_dm_task().await;
    }

    #[tokio::test]
    async fn test_uri_problems() {
        let (ctx, _hub) = test_context(None);

        let missing = CommandEnvelope::new("FirmwareUpdate");
        assert_eq!(
            FirmwareUpdateHandler.handle(&ctx, &missing).await.unwrap(),
            CommandProcessingResult::RetryLater
        );

        let malformed = CommandEnvelope::new("ConfigurationUpdate")
            .with_parameter("ConfigUri", "https://cfg.example.com/other/v2");
        assert!(matches!(
            ConfigurationUpdateHandler.handle(&ctx, &malformed).await,
            Err(HandlerError::InvalidParameter(_))
        ));
        assert!(!ctx.dm_task_active().await);
    }
}
