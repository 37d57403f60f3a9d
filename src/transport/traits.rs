//! Transport trait abstraction for pluggable device-to-cloud backends

use crate::device::DeviceIdentity;
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::{CommandEnvelope, DeviceEvent, PropertyMap};
use std::sync::Arc;

/// A device's connection to the cloud
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection
    async fn open(&self) -> Result<()>;

    /// Close the connection. Closing twice is harmless.
    async fn close(&self) -> Result<()>;

    /// Send one event upstream
    async fn send_event(&self, event: DeviceEvent) -> Result<()>;

    /// Fetch the next pending command, if any, without waiting for one
    async fn receive(&self) -> Result<Option<CommandEnvelope>>;

    /// Acknowledge a command as processed
    async fn signal_completed(&self, command: &CommandEnvelope) -> Result<()>;

    /// Hand a command back so it can be delivered again later
    async fn signal_abandoned(&self, command: &CommandEnvelope) -> Result<()>;

    /// Refuse a command permanently
    async fn signal_rejected(&self, command: &CommandEnvelope) -> Result<()>;

    /// Push a reported-properties patch; a null value clears that name and everything below it
    async fn update_reported_properties(&self, patch: PropertyMap) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Creates one transport per device
pub trait TransportFactory: Send + Sync {
    fn create_transport(&self, identity: &DeviceIdentity) -> Result<Arc<dyn Transport>>;
}
