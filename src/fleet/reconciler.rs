//! Keeps the running devices in line with the registry

use super::factory::DeviceFactory;
use super::manager::FleetManager;
use super::registry::{DeviceRegistry, InitialDeviceConfig, RegistryError};
use crate::telemetry::sleep_or_cancel;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What one reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

pub struct FleetReconciler {
    registry: Arc<dyn DeviceRegistry>,
    factory: Arc<dyn DeviceFactory>,
    manager: Arc<FleetManager>,
    poll_interval: Duration,
}

impl FleetReconciler {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        factory: Arc<dyn DeviceFactory>,
        manager: Arc<FleetManager>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            factory,
            manager,
            poll_interval,
        }
    }

    pub fn manager(&self) -> &Arc<FleetManager> {
        &self.manager
    }

    /// First entry per device ID wins; entries without an ID are dropped
    fn dedupe(devices: Vec<InitialDeviceConfig>) -> Vec<InitialDeviceConfig> {
        let mut seen = HashSet::new();
        devices
            .into_iter()
            .filter(|device| {
                if device.device_id.is_empty() {
                    warn!("[FLEET] registry entry without a device id, ignoring");
                    return false;
                }
                if !seen.insert(device.device_id.clone()) {
                    warn!(device_id = %device.device_id, "[FLEET] duplicate registry entry, ignoring");
                    return false;
                }
                true
            })
            .collect()
    }

    /// Stop devices no longer listed and start the newly listed ones
    #[instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, RegistryError> {
        let desired = Self::dedupe(self.registry.get_device_list().await?);
        let live: HashSet<String> = self.manager.get_live_devices().await.into_iter().collect();
        let desired_ids: HashSet<&str> = desired.iter().map(|d| d.device_id.as_str()).collect();

        let mut stopped: Vec<String> = live
            .iter()
            .filter(|id| !desired_ids.contains(id.as_str()))
            .cloned()
            .collect();
        stopped.sort();
        if !stopped.is_empty() {
            info!(count = stopped.len(), "[FLEET] stopping removed devices");
            self.manager.stop_devices(&stopped).await;
        }

        let mut built = Vec::new();
        for config in desired.iter().filter(|d| !live.contains(&d.device_id)) {
            match self.factory.build(config).await {
                Ok(device) => built.push(device),
                Err(e) => {
                    warn!(device_id = %config.device_id, error = %format!("{:#}", e), "[FLEET] failed to build device, retrying next poll");
                }
            }
        }

        let started = if built.is_empty() {
            Vec::new()
        } else {
            self.manager.start_devices(built).await
        };

        Ok(ReconcileReport { started, stopped })
    }

    /// Reconcile every poll interval until `token` is cancelled, then stop every device
    pub async fn process_devices(&self, token: CancellationToken) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "[FLEET] reconciler running"
        );

        loop {
            match self.reconcile_once().await {
                Ok(report) if report.is_empty() => debug!("[FLEET] fleet up to date"),
                Ok(report) => info!(
                    started = ?report.started,
                    stopped = ?report.stopped,
                    "[FLEET] fleet reconciled"
                ),
                Err(e) => error!(error = %e, "[FLEET] device registry failed, retrying next poll"),
            }

            if !sleep_or_cancel(self.poll_interval, &token).await {
                break;
            }
        }

        info!("[FLEET] shutting down, stopping all devices");
        self.manager.stop_all_devices().await;
    }
}
