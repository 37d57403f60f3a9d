//! What a command handler sees of the device it runs on

use super::identity::DeviceIdentity;
use super::properties::{reported, DeviceProperties};
use crate::config::DmTimings;
use crate::dm::{run_dm_task, DmDevice, DmOutcome, DmTaskDefinition};
use crate::telemetry::TelemetryController;
use crate::transport::Transport;
use anyhow::Result;
use simulator_shared::{DeviceEvent, PropertyMap, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Shared state of one running device
pub struct DeviceContext {
    identity: DeviceIdentity,
    properties: Arc<RwLock<DeviceProperties>>,
    transport: Arc<dyn Transport>,
    telemetry: Option<Arc<dyn TelemetryController>>,
    command_names: Vec<String>,
    dm_timings: DmTimings,
    dm_task: Mutex<Option<JoinHandle<DmOutcome>>>,
    token: CancellationToken,
}

impl DeviceContext {
    pub fn new(
        identity: DeviceIdentity,
        properties: DeviceProperties,
        transport: Arc<dyn Transport>,
        telemetry: Option<Arc<dyn TelemetryController>>,
        dm_timings: DmTimings,
    ) -> Self {
        Self {
            identity,
            properties: Arc::new(RwLock::new(properties)),
            transport,
            telemetry,
            command_names: Vec::new(),
            dm_timings,
            dm_task: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }

    /// Command names announced in device info events
    pub fn with_command_names(mut self, names: Vec<String>) -> Self {
        self.command_names = names;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    pub fn properties(&self) -> &Arc<RwLock<DeviceProperties>> {
        &self.properties
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn telemetry_controller(&self) -> Option<&Arc<dyn TelemetryController>> {
        self.telemetry.as_ref()
    }

    pub fn command_names(&self) -> &[String] {
        &self.command_names
    }

    pub fn dm_timings(&self) -> &DmTimings {
        &self.dm_timings
    }

    /// Cancelled when the device stops; DM tasks observe it at every step wait
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Device info event carrying every property and the supported commands
    pub async fn device_info(&self) -> DeviceEvent {
        let properties = self.properties.read().await.to_map();
        DeviceEvent::device_info(self.device_id(), properties, self.command_names.clone())
    }

    pub async fn send_device_info(&self) -> Result<()> {
        let event = self.device_info().await;
        self.transport.send_event(event).await
    }

    /// Initial reported properties: mapped device properties plus telemetry config
    pub async fn reported_snapshot(&self) -> PropertyMap {
        let mut snapshot = self.properties.read().await.reported_snapshot();
        if let Some(controller) = &self.telemetry {
            snapshot.insert(
                reported::TEMPERATURE_MEAN_VALUE.into(),
                Value::number(controller.temperature_mean_value()),
            );
            snapshot.insert(
                reported::TELEMETRY_INTERVAL.into(),
                Value::integer(controller.telemetry_interval().as_secs() as i64),
            );
        }
        snapshot
    }

    /// Spawn a DM task; returns false while another one is still running
    pub async fn start_dm_task(&self, definition: DmTaskDefinition) -> bool {
        let mut slot = self.dm_task.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let device = DmDevice {
            device_id: self.identity.device_id.clone(),
            transport: self.transport.clone(),
            properties: self.properties.clone(),
        };
        *slot = Some(tokio::spawn(run_dm_task(definition, device, self.token.clone())));
        true
    }

    pub async fn dm_task_active(&self) -> bool {
        self.dm_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the current DM task, if any, and return how it ended
    pub async fn wait_dm_task(&self) -> Option<DmOutcome> {
        let handle = self.dm_task.lock().await.take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("[DM] {} task panicked: {}", self.device_id(), e);
                None
            }
        }
    }
}

/// Context on a loopback transport with millisecond DM steps
#[cfg(test)]
pub(crate) fn test_context(
    telemetry: Option<Arc<dyn TelemetryController>>,
) -> (DeviceContext, crate::transport::LoopbackHub) {
    use crate::transport::{LoopbackHub, TransportFactory};
    use std::time::Duration;

    let hub = LoopbackHub::new();
    let identity = DeviceIdentity {
        device_id: "dev-1".into(),
        host_name: "hub.local".into(),
        primary_key: "key".into(),
    };
    let transport = hub.create_transport(&identity).unwrap();
    let dm_timings = DmTimings {
        firmware_step: Duration::from_millis(5),
        configuration_step: Duration::from_millis(5),
    };
    let ctx = DeviceContext::new(
        identity,
        DeviceProperties::sample("dev-1"),
        transport,
        telemetry,
        dm_timings,
    );
    (ctx, hub)
}
