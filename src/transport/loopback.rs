//! In-memory transport with a cloud-side hub
//!
//! Every device gets a mailbox in the [`LoopbackHub`]. Commands and events
//! cross it as length-prefixed protobuf frames, the same framing a socket
//! transport would use. The hub records acknowledgments and reported
//! properties so a test (or a demo) can observe what a device did.

use crate::device::DeviceIdentity;
use crate::transport::traits::{Transport, TransportFactory};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use simulator_shared::codec::{self, FrameDecoder};
use simulator_shared::{CommandEnvelope, DeviceEvent, PropertyMap};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// How a device acknowledged a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Completed,
    Abandoned,
    Rejected,
}

/// One acknowledgment observed by the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub lock_token: String,
    pub command: String,
    pub kind: AckKind,
}

/// Device-to-cloud byte stream plus the decoder reassembling its frames
struct EventStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    decoder: FrameDecoder,
}

struct Mailbox {
    command_tx: mpsc::UnboundedSender<Bytes>,
    command_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Bytes>>>,
    event_tx: mpsc::UnboundedSender<Bytes>,
    events: Arc<AsyncMutex<EventStream>>,
    acknowledgments: Vec<Acknowledgment>,
    reported: PropertyMap,
    report_history: Vec<PropertyMap>,
    open_count: usize,
    close_count: usize,
}

impl Mailbox {
    fn new() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            command_tx,
            command_rx: Arc::new(AsyncMutex::new(command_rx)),
            event_tx,
            events: Arc::new(AsyncMutex::new(EventStream {
                rx: event_rx,
                decoder: FrameDecoder::new(),
            })),
            acknowledgments: Vec::new(),
            reported: PropertyMap::new(),
            report_history: Vec::new(),
            open_count: 0,
            close_count: 0,
        }
    }

    fn apply_patch(&mut self, patch: &PropertyMap) {
        for (name, value) in patch {
            if value.is_null() {
                let nested = format!("{}.", name);
                self.reported
                    .retain(|key, _| key != name && !key.starts_with(&nested));
            } else {
                self.reported.insert(name.clone(), value.clone());
            }
        }
        self.report_history.push(patch.clone());
    }
}

/// Cloud side of the loopback transport
#[derive(Clone, Default)]
pub struct LoopbackHub {
    mailboxes: Arc<Mutex<HashMap<String, Mailbox>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_mailbox<R>(&self, device_id: &str, f: impl FnOnce(&mut Mailbox) -> R) -> R {
        let mut mailboxes = self.lock();
        let mailbox = mailboxes
            .entry(device_id.to_string())
            .or_insert_with(Mailbox::new);
        f(mailbox)
    }

    /// Queue a command for a device and return its lock token
    ///
    /// The device does not have to be running yet; the command waits in its mailbox.
    pub fn send_command(
        &self,
        device_id: &str,
        name: &str,
        parameters: PropertyMap,
    ) -> Result<String> {
        let mut command = CommandEnvelope::new(name);
        command.parameters = parameters;
        command.message_id = uuid::Uuid::new_v4().to_string();
        command.lock_token = uuid::Uuid::new_v4().to_string();

        let frame = codec::encode(&command)?;
        self.with_mailbox(device_id, |mailbox| mailbox.command_tx.send(frame))
            .map_err(|_| anyhow!("command queue for {} is closed", device_id))?;

        debug!("[HUB] queued {} for {}", name, device_id);
        Ok(command.lock_token)
    }

    /// Wait up to `wait` for the next event a device sent
    pub async fn next_event(&self, device_id: &str, wait: Duration) -> Result<Option<DeviceEvent>> {
        let deadline = Instant::now() + wait;
        let events = self.with_mailbox(device_id, |mailbox| mailbox.events.clone());
        let mut events = events.lock().await;

        loop {
            if let Some(event) = events.decoder.decode_next::<DeviceEvent>()? {
                return Ok(Some(event));
            }
            match timeout_at(deadline, events.rx.recv()).await {
                Ok(Some(chunk)) => events.decoder.extend(&chunk),
                Ok(None) | Err(_) => return Ok(None),
            }
        }
    }

    pub fn acknowledgments(&self, device_id: &str) -> Vec<Acknowledgment> {
        self.with_mailbox(device_id, |mailbox| mailbox.acknowledgments.clone())
    }

    /// Merged view of every reported-properties patch
    pub fn reported(&self, device_id: &str) -> PropertyMap {
        self.with_mailbox(device_id, |mailbox| mailbox.reported.clone())
    }

    /// Every reported-properties patch in arrival order
    pub fn report_history(&self, device_id: &str) -> Vec<PropertyMap> {
        self.with_mailbox(device_id, |mailbox| mailbox.report_history.clone())
    }

    pub fn open_count(&self, device_id: &str) -> usize {
        self.with_mailbox(device_id, |mailbox| mailbox.open_count)
    }

    pub fn close_count(&self, device_id: &str) -> usize {
        self.with_mailbox(device_id, |mailbox| mailbox.close_count)
    }

    fn record_ack(&self, device_id: &str, command: &CommandEnvelope, kind: AckKind) {
        self.with_mailbox(device_id, |mailbox| {
            mailbox.acknowledgments.push(Acknowledgment {
                lock_token: command.lock_token.clone(),
                command: command.name.clone(),
                kind,
            })
        });
    }
}

impl TransportFactory for LoopbackHub {
    fn create_transport(&self, identity: &DeviceIdentity) -> Result<Arc<dyn Transport>> {
        let (command_rx, event_tx) = self.with_mailbox(&identity.device_id, |mailbox| {
            (mailbox.command_rx.clone(), mailbox.event_tx.clone())
        });
        Ok(Arc::new(LoopbackTransport {
            device_id: identity.device_id.clone(),
            hub: self.clone(),
            command_rx,
            event_tx,
        }))
    }
}

/// Device side of the loopback hub
pub struct LoopbackTransport {
    device_id: String,
    hub: LoopbackHub,
    command_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Bytes>>>,
    event_tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self) -> Result<()> {
        self.hub
            .with_mailbox(&self.device_id, |mailbox| mailbox.open_count += 1);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.hub
            .with_mailbox(&self.device_id, |mailbox| mailbox.close_count += 1);
        Ok(())
    }

    async fn send_event(&self, event: DeviceEvent) -> Result<()> {
        let frame = codec::encode(&event)?;
        self.event_tx
            .send(frame)
            .map_err(|_| anyhow!("event stream for {} is closed", self.device_id))
    }

    async fn receive(&self) -> Result<Option<CommandEnvelope>> {
        let mut rx = self.command_rx.lock().await;
        match rx.try_recv() {
            Ok(frame) => Ok(Some(codec::decode_frame(&frame)?)),
            Err(_) => Ok(None),
        }
    }

    async fn signal_completed(&self, command: &CommandEnvelope) -> Result<()> {
        self.hub
            .record_ack(&self.device_id, command, AckKind::Completed);
        Ok(())
    }

    async fn signal_abandoned(&self, command: &CommandEnvelope) -> Result<()> {
        self.hub
            .record_ack(&self.device_id, command, AckKind::Abandoned);
        Ok(())
    }

    async fn signal_rejected(&self, command: &CommandEnvelope) -> Result<()> {
        self.hub
            .record_ack(&self.device_id, command, AckKind::Rejected);
        Ok(())
    }

    async fn update_reported_properties(&self, patch: PropertyMap) -> Result<()> {
        self.hub
            .with_mailbox(&self.device_id, |mailbox| mailbox.apply_patch(&patch));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simulator_shared::{EventKind, Value};

    fn identity(device_id: &str) -> DeviceIdentity {
        DeviceIdentity {
            device_id: device_id.into(),
            host_name: "hub.local".into(),
            primary_key: "key".into(),
        }
    }

    #[tokio::test]
    async fn test_command_round_trip_through_hub() {
        let hub = LoopbackHub::new();
        let transport = hub.create_transport(&identity("dev-1")).unwrap();

        let params = PropertyMap::from([("SetPointTemp".to_string(), Value::number(30.0))]);
        let token = hub.send_command("dev-1", "ChangeSetPointTemp", params).unwrap();

        let command = transport.receive().await.unwrap().expect("queued command");
        assert_eq!(command.name, "ChangeSetPointTemp");
        assert_eq!(command.lock_token, token);
        assert_eq!(
            command.parameter("SetPointTemp").and_then(Value::as_f64),
            Some(30.0)
        );
        assert!(transport.receive().await.unwrap().is_none());

        transport.signal_rejected(&command).await.unwrap();
        assert_eq!(
            hub.acknowledgments("dev-1"),
            vec![Acknowledgment {
                lock_token: token,
                command: "ChangeSetPointTemp".into(),
                kind: AckKind::Rejected,
            }]
        );
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let hub = LoopbackHub::new();
        let transport = hub.create_transport(&identity("dev-1")).unwrap();

        for n in 0..3i64 {
            let fields = PropertyMap::from([("n".to_string(), Value::integer(n))]);
            transport
                .send_event(DeviceEvent::telemetry("dev-1", fields))
                .await
                .unwrap();
        }

        for n in 0..3i64 {
            let event = hub
                .next_event("dev-1", Duration::from_millis(100))
                .await
                .unwrap()
                .expect("event");
            assert_eq!(event.event_kind(), EventKind::Telemetry);
            assert_eq!(event.fields["n"].as_i64(), Some(n));
        }
        assert!(hub
            .next_event("dev-1", Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_null_report_clears_nested_names() {
        let hub = LoopbackHub::new();
        let transport = hub.create_transport(&identity("dev-1")).unwrap();

        transport
            .update_reported_properties(PropertyMap::from([
                ("Method.UpdateFirmware.Status".to_string(), Value::text("Running")),
                ("Method.UpdateFirmwareX".to_string(), Value::text("kept")),
                ("System.FirmwareVersion".to_string(), Value::text("1.0")),
            ]))
            .await
            .unwrap();
        transport
            .update_reported_properties(PropertyMap::from([(
                "Method.UpdateFirmware".to_string(),
                Value::null(),
            )]))
            .await
            .unwrap();

        let reported = hub.reported("dev-1");
        assert!(!reported.contains_key("Method.UpdateFirmware.Status"));
        assert!(reported.contains_key("Method.UpdateFirmwareX"));
        assert!(reported.contains_key("System.FirmwareVersion"));
        assert_eq!(hub.report_history("dev-1").len(), 2);
    }

    #[tokio::test]
    async fn test_open_and_close_are_counted() {
        let hub = LoopbackHub::new();
        let transport = hub.create_transport(&identity("dev-1")).unwrap();

        transport.open().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(hub.open_count("dev-1"), 1);
        assert_eq!(hub.close_count("dev-1"), 1);
        assert_eq!(hub.close_count("dev-2"), 0);
    }
}
