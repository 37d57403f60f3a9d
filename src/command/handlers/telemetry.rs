//! Telemetry control command handlers

use crate::command::{bool_parameter, number_parameter, CommandHandler, CommandProcessingResult, HandlerError};
use crate::device::DeviceContext;
use crate::telemetry::TelemetryController;
use async_trait::async_trait;
use simulator_shared::CommandEnvelope;
use std::sync::Arc;
use tracing::warn;

/// The device's controllable telemetry, or `None` after logging why the command cannot run
fn controller<'a>(
    device: &'a DeviceContext,
    command: &CommandEnvelope,
) -> Option<&'a Arc<dyn TelemetryController>> {
    let controller = device.telemetry_controller();
    if controller.is_none() {
        warn!(
            "[TELEMETRY] {} has no controllable telemetry for {}",
            device.device_id(),
            command.name
        );
    }
    controller
}

/// Handle StartTelemetry command
pub struct StartTelemetryHandler;

#[async_trait]
impl CommandHandler for StartTelemetryHandler {
    fn command_name(&self) -> &'static str {
        "StartTelemetry"
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(controller) = controller(device, command) else {
            return Ok(CommandProcessingResult::CannotComplete);
        };
        controller.set_telemetry_active(true);
        Ok(CommandProcessingResult::Success)
    }
}

/// Handle StopTelemetry command
pub struct StopTelemetryHandler;

#[async_trait]
impl CommandHandler for StopTelemetryHandler {
    fn command_name(&self) -> &'static str {
        "StopTelemetry"
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(controller) = controller(device, command) else {
            return Ok(CommandProcessingResult::CannotComplete);
        };
        controller.set_telemetry_active(false);
        Ok(CommandProcessingResult::Success)
    }
}

/// Handle DiagnosticTelemetry command (`Active`: bool)
pub struct DiagnosticTelemetryHandler;

#[async_trait]
impl CommandHandler for DiagnosticTelemetryHandler {
    fn command_name(&self) -> &'static str {
        "DiagnosticTelemetry"
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(active) = bool_parameter(command, "Active")? else {
            return Ok(CommandProcessingResult::RetryLater);
        };
        let Some(controller) = controller(device, command) else {
            return Ok(CommandProcessingResult::CannotComplete);
        };
        controller.set_external_temperature_active(active);
        Ok(CommandProcessingResult::Success)
    }
}

/// Handle ChangeSetPointTemp command (`SetPointTemp`: number)
pub struct ChangeSetPointTempHandler;

#[async_trait]
impl CommandHandler for ChangeSetPointTempHandler {
    fn command_name(&self) -> &'static str {
        "ChangeSetPointTemp"
    }

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError> {
        let Some(set_point) = number_parameter(command, "SetPointTemp")? else {
            return Ok(CommandProcessingResult::RetryLater);
        };
        let Some(controller) = controller(device, command) else {
            return Ok(CommandProcessingResult::CannotComplete);
        };
        controller.change_set_point_temperature(set_point);
        Ok(CommandProcessingResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_context;
    use crate::telemetry::{RandomSource, RemoteMonitorTelemetry};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn remote_monitor() -> Arc<RemoteMonitorTelemetry> {
        Arc::new(
            RemoteMonitorTelemetry::new("dev-1", Duration::from_secs(15), || {
                Box::new(StdRng::seed_from_u64(1)) as Box<dyn RandomSource>
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_telemetry() {
        let monitor = remote_monitor();
        let (ctx, _hub) = test_context(Some(monitor.clone() as Arc<dyn TelemetryController>));

        let result = StopTelemetryHandler
            .handle(&ctx, &CommandEnvelope::new("StopTelemetry"))
            .await
            .unwrap();
        assert_eq!(result, CommandProcessingResult::Success);
        assert!(!monitor.telemetry_active());

        StartTelemetryHandler
            .handle(&ctx, &CommandEnvelope::new("StartTelemetry"))
            .await
            .unwrap();
        assert!(monitor.telemetry_active());
    }

    #[tokio::test]
    async fn test_set_point_accepts_numeric_text() {
        let monitor = remote_monitor();
        let (ctx, _hub) = test_context(Some(monitor.clone() as Arc<dyn TelemetryController>));

        let command = CommandEnvelope::new("ChangeSetPointTemp").with_parameter("SetPointTemp", "21.5");
        let result = ChangeSetPointTempHandler.handle(&ctx, &command).await.unwrap();

        assert_eq!(result, CommandProcessingResult::Success);
        assert!((monitor.temperature_mean_value() - 21.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_parameters() {
        let (ctx, _hub) = test_context(Some(remote_monitor() as Arc<dyn TelemetryController>));

        let result = DiagnosticTelemetryHandler
            .handle(&ctx, &CommandEnvelope::new("DiagnosticTelemetry"))
            .await
            .unwrap();
        assert_eq!(result, CommandProcessingResult::RetryLater);

        let command = CommandEnvelope::new("ChangeSetPointTemp").with_parameter("SetPointTemp", "warm");
        assert!(matches!(
            ChangeSetPointTempHandler.handle(&ctx, &command).await,
            Err(HandlerError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_without_controller_cannot_complete() {
        let (ctx, _hub) = test_context(None);

        let result = StartTelemetryHandler
            .handle(&ctx, &CommandEnvelope::new("StartTelemetry"))
            .await
            .unwrap();
        assert_eq!(result, CommandProcessingResult::CannotComplete);

        let command = CommandEnvelope::new("DiagnosticTelemetry").with_parameter("Active", true);
        let result = DiagnosticTelemetryHandler.handle(&ctx, &command).await.unwrap();
        assert_eq!(result, CommandProcessingResult::CannotComplete);
    }
}
