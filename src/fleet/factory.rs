//! Builds device runtimes for registry entries

use super::registry::InitialDeviceConfig;
use crate::command::handlers::cooler_handlers;
use crate::config::{DeviceTimings, DmTimings};
use crate::device::{DeviceIdentity, DeviceParts, DeviceRuntime};
use crate::telemetry::{RandomSource, RemoteMonitorTelemetry, TelemetryController, TelemetryEvent};
use crate::transport::TransportFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Build and connect one device; the runtime is not started yet
    async fn build(&self, config: &InitialDeviceConfig) -> Result<DeviceRuntime>;
}

/// Cooler devices: the full cooler command set plus remote-monitor telemetry
pub struct CoolerDeviceFactory {
    transport_factory: Arc<dyn TransportFactory>,
    default_host_name: String,
    timings: DeviceTimings,
    dm_timings: DmTimings,
    rng: Mutex<StdRng>,
}

impl CoolerDeviceFactory {
    /// `seed` makes every generated telemetry stream reproducible
    pub fn new(
        transport_factory: Arc<dyn TransportFactory>,
        default_host_name: impl Into<String>,
        timings: DeviceTimings,
        dm_timings: DmTimings,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            transport_factory,
            default_host_name: default_host_name.into(),
            timings,
            dm_timings,
            rng: Mutex::new(rng),
        }
    }

    fn next_seed(&self) -> u64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_u64()
    }

    fn identity(&self, config: &InitialDeviceConfig) -> DeviceIdentity {
        let mut identity = DeviceIdentity::from(config);
        if identity.host_name.is_empty() {
            identity.host_name = self.default_host_name.clone();
        }
        identity
    }
}

#[async_trait]
impl DeviceFactory for CoolerDeviceFactory {
    async fn build(&self, config: &InitialDeviceConfig) -> Result<DeviceRuntime> {
        let identity = self.identity(config);

        let monitor = Arc::new(
            RemoteMonitorTelemetry::new(&identity.device_id, self.timings.telemetry_interval, || {
                Box::new(StdRng::seed_from_u64(self.next_seed())) as Box<dyn RandomSource>
            })
            .context("invalid telemetry ranges")?,
        );
        let telemetry_events: Vec<Arc<dyn TelemetryEvent>> = vec![monitor.clone()];
        let telemetry_controller: Option<Arc<dyn TelemetryController>> = Some(monitor);

        let parts = DeviceParts {
            transport_factory: self.transport_factory.clone(),
            timings: self.timings.clone(),
            dm_timings: self.dm_timings.clone(),
            handlers: cooler_handlers(),
            telemetry_events,
            telemetry_controller,
        };

        debug!("[FLEET] building cooler {}", identity.device_id);
        DeviceRuntime::initialize(identity, parts)
            .await
            .with_context(|| format!("failed to initialize device {}", config.device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackHub;
    use simulator_shared::EventKind;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn factory(hub: &LoopbackHub) -> CoolerDeviceFactory {
        CoolerDeviceFactory::new(
            Arc::new(hub.clone()),
            "default.hub",
            DeviceTimings {
                receive_poll_interval: Duration::from_millis(5),
                report_interval: Duration::from_millis(5),
                telemetry_interval: Duration::from_millis(10),
                repeat_event_list_forever: true,
            },
            DmTimings::default(),
            Some(42),
        )
    }

    #[tokio::test]
    async fn test_cooler_has_full_command_set_and_telemetry() {
        let hub = LoopbackHub::new();
        let config = InitialDeviceConfig {
            host_name: String::new(),
            device_id: "cooler-1".into(),
            key: "k".into(),
        };
        let device = Arc::new(factory(&hub).build(&config).await.unwrap());

        assert_eq!(device.context().identity().host_name, "default.hub");
        assert_eq!(
            device.context().command_names(),
            [
                "PingDevice",
                "StartTelemetry",
                "StopTelemetry",
                "DiagnosticTelemetry",
                "ChangeSetPointTemp",
                "ChangeDeviceState",
                "FirmwareUpdate",
                "ConfigurationUpdate",
            ]
        );
        assert!(device.context().telemetry_controller().is_some());

        let token = CancellationToken::new();
        let task = tokio::spawn({
            let device = device.clone();
            let token = token.clone();
            async move { device.start(token).await }
        });

        let wait = Duration::from_millis(500);
        let info = hub.next_event("cooler-1", wait).await.unwrap().unwrap();
        assert_eq!(info.event_kind(), EventKind::DeviceInfo);
        let sample = hub.next_event("cooler-1", wait).await.unwrap().unwrap();
        assert_eq!(sample.event_kind(), EventKind::Telemetry);
        assert!(sample.fields.contains_key("Temperature"));
        assert!(hub.reported("cooler-1").contains_key("Config.TelemetryInterval"));

        token.cancel();
        task.await.unwrap().unwrap();
    }
}
