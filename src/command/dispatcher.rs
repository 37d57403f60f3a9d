//! Command dispatcher - routes a command to the first handler claiming its name

use super::{CommandHandler, CommandProcessingResult, HandlerError};
use crate::device::DeviceContext;
use anyhow::Result;
use simulator_shared::CommandEnvelope;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a handler for {0} is already registered")]
    DuplicateHandler(String),
}

/// Ordered handler list; registration order is priority order
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dispatcher from handlers in priority order
    pub fn with_handlers(handlers: Vec<Box<dyn CommandHandler>>) -> Result<Self, DispatchError> {
        let mut dispatcher = Self::new();
        for handler in handlers {
            dispatcher.register(handler)?;
        }
        Ok(dispatcher)
    }

    pub fn register(&mut self, handler: Box<dyn CommandHandler>) -> Result<(), DispatchError> {
        let name = handler.command_name();
        if self.handlers.iter().any(|h| h.command_name() == name) {
            return Err(DispatchError::DuplicateHandler(name.to_string()));
        }
        self.handlers.push(handler);
        Ok(())
    }

    /// Names of every handled command, in priority order
    pub fn command_names(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|h| h.command_name().to_string())
            .collect()
    }

    /// Process a command.
    ///
    /// Unknown names and invalid parameters yield `CannotComplete`; device
    /// failures are returned as errors for the caller to abandon on.
    pub async fn dispatch(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult> {
        let Some(handler) = self
            .handlers
            .iter()
            .find(|h| h.command_name() == command.name)
        else {
            warn!("[COMMAND] {} has no handler for {}", device.device_id(), command.name);
            return Ok(CommandProcessingResult::CannotComplete);
        };

        match handler.handle(device, command).await {
            Ok(result) => {
                debug!("[COMMAND] {} {} -> {:?}", device.device_id(), command.name, result);
                Ok(result)
            }
            Err(HandlerError::InvalidParameter(reason)) => {
                warn!("[COMMAND] {} {} rejected: {}", device.device_id(), command.name, reason);
                Ok(CommandProcessingResult::CannotComplete)
            }
            Err(HandlerError::Device(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::PingDeviceHandler;
    use crate::device::test_context;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        outcome: fn() -> Result<CommandProcessingResult, HandlerError>,
    }

    #[async_trait]
    impl CommandHandler for Fixed {
        fn command_name(&self) -> &'static str {
            self.name
        }

        async fn handle(
            &self,
            _device: &DeviceContext,
            _command: &CommandEnvelope,
        ) -> Result<CommandProcessingResult, HandlerError> {
            (self.outcome)()
        }
    }

    #[tokio::test]
    async fn test_unknown_command_cannot_complete() {
        let (ctx, _hub) = test_context(None);
        let dispatcher = CommandDispatcher::with_handlers(vec![Box::new(PingDeviceHandler)]).unwrap();

        let result = dispatcher
            .dispatch(&ctx, &CommandEnvelope::new("SelfDestruct"))
            .await
            .unwrap();
        assert_eq!(result, CommandProcessingResult::CannotComplete);
    }

    #[tokio::test]
    async fn test_ping_succeeds() {
        let (ctx, _hub) = test_context(None);
        let dispatcher = CommandDispatcher::with_handlers(vec![Box::new(PingDeviceHandler)]).unwrap();

        let result = dispatcher
            .dispatch(&ctx, &CommandEnvelope::new("PingDevice"))
            .await
            .unwrap();
        assert_eq!(result, CommandProcessingResult::Success);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(Box::new(PingDeviceHandler)).unwrap();

        let err = dispatcher.register(Box::new(PingDeviceHandler)).unwrap_err();
        assert_eq!(err, DispatchError::DuplicateHandler("PingDevice".into()));
        assert_eq!(dispatcher.command_names(), vec!["PingDevice".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_errors_are_split() {
        let (ctx, _hub) = test_context(None);
        let dispatcher = CommandDispatcher::with_handlers(vec![
            Box::new(Fixed {
                name: "Bad",
                outcome: || Err(HandlerError::InvalidParameter("nope".into())),
            }),
            Box::new(Fixed {
                name: "Broken",
                outcome: || Err(HandlerError::Device(anyhow::anyhow!("link down"))),
            }),
        ])
        .unwrap();

        let result = dispatcher.dispatch(&ctx, &CommandEnvelope::new("Bad")).await.unwrap();
        assert_eq!(result, CommandProcessingResult::CannotComplete);

        assert!(dispatcher
            .dispatch(&ctx, &CommandEnvelope::new("Broken"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_first_registered_handler_wins() {
        let (ctx, _hub) = test_context(None);
        let dispatcher = CommandDispatcher::with_handlers(vec![
            Box::new(Fixed {
                name: "A",
                outcome: || Ok(CommandProcessingResult::RetryLater),
            }),
            Box::new(Fixed {
                name: "B",
                outcome: || Ok(CommandProcessingResult::Success),
            }),
        ])
        .unwrap();

        let result = dispatcher.dispatch(&ctx, &CommandEnvelope::new("A")).await.unwrap();
        assert_eq!(result, CommandProcessingResult::RetryLater);
    }
}
