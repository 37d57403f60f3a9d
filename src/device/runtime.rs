//! Device runtime: telemetry send loop and command receive loop over one transport

use super::context::DeviceContext;
use super::identity::DeviceIdentity;
use super::pause::{GateClosed, PauseGate};
use super::properties::DeviceProperties;
use crate::command::{CommandDispatcher, CommandHandler, CommandProcessingResult, DispatchError};
use crate::config::{DeviceTimings, DmTimings};
use crate::telemetry::{sleep_or_cancel, EventSink, TelemetryController, TelemetryEvent};
use crate::transport::TransportFactory;
use async_trait::async_trait;
use simulator_shared::{CommandEnvelope, DeviceEvent, PropertyMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device has been disposed")]
    Disposed,

    #[error("device has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),
}

/// Everything a device is assembled from, besides its identity
pub struct DeviceParts {
    pub transport_factory: Arc<dyn TransportFactory>,
    pub timings: DeviceTimings,
    pub dm_timings: DmTimings,
    /// Command handlers in priority order
    pub handlers: Vec<Box<dyn CommandHandler>>,
    /// Telemetry groups, run in order on every pass
    pub telemetry_events: Vec<Arc<dyn TelemetryEvent>>,
    pub telemetry_controller: Option<Arc<dyn TelemetryController>>,
}

/// Forwards telemetry payloads to the device's transport. A send still in
/// flight when the device token is cancelled is dropped.
struct TransportSink<'a> {
    context: &'a DeviceContext,
}

#[async_trait]
impl EventSink for TransportSink<'_> {
    async fn send(&self, fields: PropertyMap) -> anyhow::Result<()> {
        let event = DeviceEvent::telemetry(self.context.device_id(), fields);
        tokio::select! {
            _ = self.context.cancellation_token().cancelled() => Ok(()),
            result = self.context.transport().send_event(event) => result,
        }
    }
}

/// One simulated device. Built once per start and never reused.
pub struct DeviceRuntime {
    context: DeviceContext,
    dispatcher: CommandDispatcher,
    telemetry_events: Vec<Arc<dyn TelemetryEvent>>,
    timings: DeviceTimings,
    gate: PauseGate,
    started: AtomicBool,
    closed: AtomicBool,
}

impl DeviceRuntime {
    /// Build the device and open its transport
    pub async fn initialize(identity: DeviceIdentity, parts: DeviceParts) -> Result<Self, DeviceError> {
        let dispatcher = CommandDispatcher::with_handlers(parts.handlers)?;

        let transport = parts
            .transport_factory
            .create_transport(&identity)
            .map_err(DeviceError::Transport)?;
        transport.open().await.map_err(DeviceError::Transport)?;
        info!(
            "[DEVICE] {} connected to {} via {}",
            identity.device_id,
            identity.host_name,
            transport.name()
        );

        let properties = DeviceProperties::sample(&identity.device_id);
        let context = DeviceContext::new(
            identity,
            properties,
            transport,
            parts.telemetry_controller,
            parts.dm_timings,
        )
        .with_command_names(dispatcher.command_names());

        Ok(Self {
            context,
            dispatcher,
            telemetry_events: parts.telemetry_events,
            timings: parts.timings,
            gate: PauseGate::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn device_id(&self) -> &str {
        self.context.device_id()
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Run both loops until `token` is cancelled or the device is disposed,
    /// then wait for any DM task and close the transport.
    pub async fn start(&self, token: CancellationToken) -> Result<(), DeviceError> {
        if self.gate.is_disposed() {
            self.close_transport().await;
            return Err(DeviceError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyStarted);
        }

        let device_id = self.device_id().to_string();
        info!("[DEVICE] {} starting", device_id);

        let snapshot = self.context.reported_snapshot().await;
        if let Err(e) = self.context.transport().update_reported_properties(snapshot).await {
            error!("[DEVICE] {} initial reported properties failed: {:#}", device_id, e);
        }
        if let Err(e) = self.context.send_device_info().await {
            error!("[DEVICE] {} device info failed: {:#}", device_id, e);
        }

        let device_token = self.context.cancellation_token();
        let forward = async {
            tokio::select! {
                _ = token.cancelled() => device_token.cancel(),
                _ = device_token.cancelled() => {}
            }
        };
        tokio::join!(self.send_loop(), self.receive_loop(), forward);

        if let Some(outcome) = self.context.wait_dm_task().await {
            debug!("[DM] {} last task ended {:?}", device_id, outcome);
        }
        self.close_transport().await;

        info!("[DEVICE] {} stopped", device_id);
        Ok(())
    }

    async fn send_loop(&self) {
        let token = self.context.cancellation_token();
        let sink = TransportSink {
            context: &self.context,
        };

        loop {
            match self.gate.wait_open(token).await {
                Ok(()) => {}
                Err(GateClosed::Cancelled) | Err(GateClosed::Disposed) => return,
            }

            for event in &self.telemetry_events {
                if token.is_cancelled() {
                    return;
                }
                if let Err(e) = event.send_events(token, &sink).await {
                    error!("[TELEMETRY] {} send loop failed: {:#}", self.device_id(), e);
                    return;
                }
            }

            if !self.timings.repeat_event_list_forever {
                warn!(
                    "[TELEMETRY] {} event list finished, not repeating",
                    self.device_id()
                );
                return;
            }
            if !sleep_or_cancel(self.timings.report_interval, token).await {
                return;
            }
        }
    }

    async fn receive_loop(&self) {
        let token = self.context.cancellation_token();
        let transport = self.context.transport();

        loop {
            if !sleep_or_cancel(self.timings.receive_poll_interval, token).await {
                return;
            }

            let received = tokio::select! {
                _ = token.cancelled() => return,
                received = transport.receive() => received,
            };
            let command = match received {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    error!("[COMMAND] {} receive failed: {:#}", self.device_id(), e);
                    continue;
                }
            };
            info!("[COMMAND] {} received {}", self.device_id(), command.name);

            let acknowledged = match self.dispatcher.dispatch(&self.context, &command).await {
                Ok(result) => self.acknowledge(&command, result).await,
                Err(e) => {
                    error!("[COMMAND] {} {} failed: {:#}", self.device_id(), command.name, e);
                    Err(e)
                }
            };

            if let Err(e) = acknowledged {
                warn!(
                    "[COMMAND] {} abandoning {}: {:#}",
                    self.device_id(),
                    command.name,
                    e
                );
                if let Err(e) = transport.signal_abandoned(&command).await {
                    error!("[COMMAND] {} abandon failed: {:#}", self.device_id(), e);
                }
            }
        }
    }

    async fn acknowledge(
        &self,
        command: &CommandEnvelope,
        result: CommandProcessingResult,
    ) -> anyhow::Result<()> {
        let transport = self.context.transport();
        match result {
            CommandProcessingResult::Success => transport.signal_completed(command).await,
            CommandProcessingResult::RetryLater => transport.signal_abandoned(command).await,
            CommandProcessingResult::CannotComplete => transport.signal_rejected(command).await,
        }
    }

    /// Close the transport unless it is already closed
    pub async fn close_transport(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.context.transport().close().await {
            error!("[DEVICE] {} close failed: {:#}", self.device_id(), e);
        }
    }

    /// Hold the send loop before its next pass
    pub fn pause(&self) -> Result<(), DeviceError> {
        if self.gate.pause() {
            Ok(())
        } else {
            Err(DeviceError::Disposed)
        }
    }

    pub fn resume(&self) -> Result<(), DeviceError> {
        if self.gate.resume() {
            Ok(())
        } else {
            Err(DeviceError::Disposed)
        }
    }

    pub fn is_paused(&self) -> Result<bool, DeviceError> {
        if self.gate.is_disposed() {
            return Err(DeviceError::Disposed);
        }
        Ok(self.gate.is_paused())
    }

    /// Release the pause gate for good and stop both loops
    pub fn dispose(&self) {
        self.gate.dispose();
        self.context.cancellation_token().cancel();
    }
}
