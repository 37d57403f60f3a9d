//! Command handling for simulated devices
//!
//! This module handles:
//! - Routing inbound commands to the first handler claiming their name
//! - Mapping handler outcomes to acknowledgments
//! - Parameter extraction shared by the handlers

mod dispatcher;
pub mod handlers;

pub use dispatcher::{CommandDispatcher, DispatchError};

use crate::device::DeviceContext;
use async_trait::async_trait;
use simulator_shared::{CommandEnvelope, Value};
use thiserror::Error;

/// Outcome of processing one command; decides how it is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandProcessingResult {
    /// Processed; the command is completed
    Success,
    /// Not processed now; the command is abandoned and may come back
    RetryLater,
    /// Never processable; the command is rejected
    CannotComplete,
}

/// Why a handler could not produce a result
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The command carries a parameter that can never be processed
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The device failed while acting on the command
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

/// Processes one command name
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn command_name(&self) -> &'static str;

    async fn handle(
        &self,
        device: &DeviceContext,
        command: &CommandEnvelope,
    ) -> Result<CommandProcessingResult, HandlerError>;
}

/// Text parameter; `None` when absent
pub(crate) fn text_parameter<'a>(
    command: &'a CommandEnvelope,
    name: &str,
) -> Result<Option<&'a str>, HandlerError> {
    match command.parameter(name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| HandlerError::InvalidParameter(format!("{} must be text, got {}", name, value))),
    }
}

/// Numeric parameter; numeric text such as "21.5" is accepted
pub(crate) fn number_parameter(command: &CommandEnvelope, name: &str) -> Result<Option<f64>, HandlerError> {
    let Some(value) = command.parameter(name) else {
        return Ok(None);
    };
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
        .map(Some)
        .ok_or_else(|| HandlerError::InvalidParameter(format!("{} must be a number, got {}", name, value)))
}

/// Boolean parameter; "true"/"false" text is accepted
pub(crate) fn bool_parameter(command: &CommandEnvelope, name: &str) -> Result<Option<bool>, HandlerError> {
    let Some(value) = command.parameter(name) else {
        return Ok(None);
    };
    value
        .as_bool()
        .or_else(|| value.as_str().and_then(parse_bool))
        .map(Some)
        .ok_or_else(|| HandlerError::InvalidParameter(format!("{} must be a boolean, got {}", name, value)))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Any non-null parameter, rendered as text
pub(crate) fn display_parameter(command: &CommandEnvelope, name: &str) -> Option<String> {
    command.parameter(name).map(Value::to_string)
}
