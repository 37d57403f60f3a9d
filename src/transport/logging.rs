//! Transport that only logs what a device would send

use crate::device::DeviceIdentity;
use crate::transport::traits::{Transport, TransportFactory};
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::{CommandEnvelope, DeviceEvent, PropertyMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Logs and drops every send; never yields a command
pub struct LoggingTransport {
    device_id: String,
    open: AtomicBool,
}

impl LoggingTransport {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            open: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        info!("[TRANSPORT] {} opened", self.device_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            info!("[TRANSPORT] {} closed", self.device_id);
        }
        Ok(())
    }

    async fn send_event(&self, event: DeviceEvent) -> Result<()> {
        let fields: Vec<String> = event
            .fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        debug!(
            "[TRANSPORT] {} -> {:?} {}",
            self.device_id,
            event.event_kind(),
            fields.join(" ")
        );
        Ok(())
    }

    async fn receive(&self) -> Result<Option<CommandEnvelope>> {
        Ok(None)
    }

    async fn signal_completed(&self, command: &CommandEnvelope) -> Result<()> {
        debug!("[TRANSPORT] {} completed {}", self.device_id, command.name);
        Ok(())
    }

    async fn signal_abandoned(&self, command: &CommandEnvelope) -> Result<()> {
        debug!("[TRANSPORT] {} abandoned {}", self.device_id, command.name);
        Ok(())
    }

    async fn signal_rejected(&self, command: &CommandEnvelope) -> Result<()> {
        debug!("[TRANSPORT] {} rejected {}", self.device_id, command.name);
        Ok(())
    }

    async fn update_reported_properties(&self, patch: PropertyMap) -> Result<()> {
        for (name, value) in &patch {
            debug!("[TRANSPORT] {} reported {} = {}", self.device_id, name, value);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Logging"
    }
}

/// Hands out a [`LoggingTransport`] per device
#[derive(Debug, Default, Clone)]
pub struct LoggingTransportFactory;

impl TransportFactory for LoggingTransportFactory {
    fn create_transport(&self, identity: &DeviceIdentity) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(LoggingTransport::new(identity.device_id.clone())))
    }
}
