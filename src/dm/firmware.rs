//! Firmware update: pending -> downloading -> applying -> rebooting -> idle

use super::engine::{DmDevice, DmTaskDefinition, DmTaskHooks};
use super::progress::{ProgressRecord, COMPLETE, FAILED, RUNNING};
use super::DmTaskError;
use crate::device::properties::reported;
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::state_machine::{DmTaskState, DmTaskStep, StepGraph};
use simulator_shared::{now_ms, PropertyMap, Value};
use std::time::Duration;
use tracing::info;
use url::Url;

pub const COMMAND_NAME: &str = "FirmwareUpdate";
pub const URI_PARAMETER: &str = "FwPackageUri";
pub const REPORT_PREFIX: &str = "Method.UpdateFirmware";

/// Firmware version carried by a package URI: its last non-empty path segment
pub fn version_from_uri(uri: &str) -> Result<String, DmTaskError> {
    let url = Url::parse(uri).map_err(|e| DmTaskError::InvalidUri(format!("{}: {}", uri, e)))?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| DmTaskError::InvalidUri(format!("{}: no version segment", uri)))
}

/// Hooks of one firmware update run
pub struct FirmwareUpdate {
    version: String,
    progress: ProgressRecord,
}

impl FirmwareUpdate {
    /// Build the task for `uri`, with each non-pending phase lasting `step`
    pub fn definition(uri: &str, step: Duration) -> Result<DmTaskDefinition, DmTaskError> {
        let version = version_from_uri(uri)?;
        let graph = StepGraph::new(vec![
            DmTaskStep::new(DmTaskState::FuPending, Duration::ZERO, DmTaskState::FuDownloading),
            DmTaskStep::new(DmTaskState::FuDownloading, step, DmTaskState::FuApplying),
            DmTaskStep::new(DmTaskState::FuApplying, step, DmTaskState::FuRebooting),
            DmTaskStep::new(DmTaskState::FuRebooting, step, DmTaskState::Idle),
        ])?;

        Ok(DmTaskDefinition {
            name: COMMAND_NAME,
            graph,
            hooks: Box::new(FirmwareUpdate {
                version,
                progress: ProgressRecord::new(REPORT_PREFIX),
            }),
        })
    }

    /// Report one phase starting; returns whether it may proceed
    fn enter_phase(
        &mut self,
        patch: &mut PropertyMap,
        step: &str,
        running: &str,
        failure_marker: &str,
    ) -> bool {
        self.progress.restart_step();
        let succeed = !self.version.ends_with(failure_marker);
        if succeed {
            self.progress.step_status(patch, step, RUNNING);
            self.progress.log(patch, running, true);
        } else {
            self.progress.step_status(patch, step, FAILED);
            self.progress.log(patch, format!("{} failed", step), false);
        }
        succeed
    }

    fn leave_phase(&mut self, patch: &mut PropertyMap, step: &str, done: &str) {
        self.progress.step_status(patch, step, COMPLETE);
        let segment = format!("{}({}s)", done, self.progress.step_elapsed_secs());
        self.progress.log(patch, segment, false);
    }
}

#[async_trait]
impl DmTaskHooks for FirmwareUpdate {
    async fn on_enter(&mut self, state: DmTaskState, device: &DmDevice) -> Result<bool> {
        let mut patch = PropertyMap::new();
        let succeed = match state {
            DmTaskState::FuPending => {
                device.report(self.progress.clear()).await?;
                self.progress.restart();
                self.progress.status(&mut patch, RUNNING);
                self.progress.log(&mut patch, "Pending", false);
                true
            }
            DmTaskState::FuDownloading => {
                self.enter_phase(&mut patch, "Download", "Downloading", "downloadFail")
            }
            DmTaskState::FuApplying => {
                self.enter_phase(&mut patch, "Applied", "Applying", "applyFail")
            }
            DmTaskState::FuRebooting => {
                self.enter_phase(&mut patch, "Reboot", "Rebooting", "rebootFail")
            }
            DmTaskState::Idle => {
                device
                    .properties
                    .write()
                    .await
                    .set_firmware_version(self.version.clone());
                self.progress.status(&mut patch, COMPLETE);
                patch.insert(
                    reported::STARTUP_TIME.into(),
                    Value::integer(now_ms() as i64),
                );
                patch.insert(
                    reported::FIRMWARE_VERSION.into(),
                    Value::text(self.version.clone()),
                );
                info!("[DM] {} firmware now {}", device.device_id, self.version);
                true
            }
            other => anyhow::bail!("firmware update has no state {}", other),
        };

        device.report(patch).await?;
        Ok(succeed)
    }

    async fn on_leave(&mut self, state: DmTaskState, device: &DmDevice) -> Result<bool> {
        let mut patch = PropertyMap::new();
        match state {
            DmTaskState::FuDownloading => self.leave_phase(&mut patch, "Download", "Downloaded"),
            DmTaskState::FuApplying => self.leave_phase(&mut patch, "Applied", "Applied"),
            DmTaskState::FuRebooting => self.leave_phase(&mut patch, "Reboot", "Rebooted"),
            _ => {}
        }
        device.report(patch).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceIdentity, DeviceProperties};
    use crate::dm::{run_dm_task, DmOutcome};
    use crate::transport::{LoopbackHub, TransportFactory};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tokio_util::sync::CancellationToken;

    fn device(hub: &LoopbackHub) -> DmDevice {
        let identity = DeviceIdentity {
            device_id: "dev-1".into(),
            host_name: "hub.local".into(),
            primary_key: "key".into(),
        };
        DmDevice {
            device_id: identity.device_id.clone(),
            transport: hub.create_transport(&identity).unwrap(),
            properties: Arc::new(RwLock::new(DeviceProperties::sample("dev-1"))),
        }
    }

    #[test]
    fn test_version_is_last_path_segment() {
        assert_eq!(
            version_from_uri("https://fw.example.com/packages/2.1.0/").unwrap(),
            "2.1.0"
        );
        assert!(matches!(
            version_from_uri("https://fw.example.com/"),
            Err(DmTaskError::InvalidUri(_))
        ));
        assert!(matches!(
            version_from_uri("not a uri"),
            Err(DmTaskError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_full_update_commits_version_once() {
        let hub = LoopbackHub::new();
        let device = device(&hub);
        let definition =
            FirmwareUpdate::definition("https://fw.example.com/2.0", Duration::from_millis(1)).unwrap();

        let outcome = run_dm_task(definition, device.clone(), CancellationToken::new()).await;
        assert_eq!(outcome, DmOutcome::Completed);

        assert_eq!(device.properties.read().await.firmware_version(), Some("2.0"));

        let history = hub.report_history("dev-1");
        let commits = history
            .iter()
            .filter(|patch| patch.contains_key(reported::FIRMWARE_VERSION))
            .count();
        assert_eq!(commits, 1);
        // the first patch clears any previous run
        assert!(history[0][REPORT_PREFIX].is_null());

        let merged = hub.reported("dev-1");
        assert_eq!(merged["Method.UpdateFirmware.Status"].as_str(), Some(COMPLETE));
        assert_eq!(
            merged["Method.UpdateFirmware.Reboot.Status"].as_str(),
            Some(COMPLETE)
        );
        assert_eq!(
            merged["Method.UpdateFirmware.Log"].as_str(),
            Some("Pending -> Downloaded(0s) -> Applied(0s) -> Rebooted(0s)")
        );
        assert!(merged.contains_key(reported::STARTUP_TIME));
    }

    #[tokio::test]
    async fn test_apply_failure_stops_before_reboot() {
        let hub = LoopbackHub::new();
        let device = device(&hub);
        let before = device.properties.read().await.firmware_version().map(String::from);
        let definition = FirmwareUpdate::definition(
            "https://fw.example.com/applyFail",
            Duration::from_millis(1),
        )
        .unwrap();

        let outcome = run_dm_task(definition, device.clone(), CancellationToken::new()).await;
        assert_eq!(
            outcome,
            DmOutcome::Aborted {
                state: DmTaskState::FuApplying
            }
        );

        let merged = hub.reported("dev-1");
        assert_eq!(merged["Method.UpdateFirmware.Status"].as_str(), Some(FAILED));
        assert_eq!(
            merged["Method.UpdateFirmware.Applied.Status"].as_str(),
            Some(FAILED)
        );
        assert!(!merged.contains_key("Method.UpdateFirmware.Reboot.Status"));
        assert!(!merged.contains_key(reported::FIRMWARE_VERSION));
        assert_eq!(
            device.properties.read().await.firmware_version().map(String::from),
            before
        );
    }

    #[tokio::test]
    async fn test_download_failure_reports_nothing_past_download() {
        let hub = LoopbackHub::new();
        let device = device(&hub);
        let definition = FirmwareUpdate::definition(
            "https://fw.example.com/v3downloadFail",
            Duration::from_millis(1),
        )
        .unwrap();

        let outcome = run_dm_task(definition, device.clone(), CancellationToken::new()).await;
        assert_eq!(
            outcome,
            DmOutcome::Aborted {
                state: DmTaskState::FuDownloading
            }
        );

        let merged = hub.reported("dev-1");
        assert_eq!(merged["Method.UpdateFirmware.Status"].as_str(), Some(FAILED));
        assert_eq!(
            merged["Method.UpdateFirmware.Download.Status"].as_str(),
            Some(FAILED)
        );
        assert_eq!(
            merged["Method.UpdateFirmware.Log"].as_str(),
            Some("Pending -> Download failed")
        );
        assert!(!merged.contains_key("Method.UpdateFirmware.Applied.Status"));
        assert!(!merged.contains_key(reported::FIRMWARE_VERSION));
    }

    #[tokio::test]
    async fn test_reboot_failure_keeps_old_version() {
        let hub = LoopbackHub::new();
        let device = device(&hub);
        let before = device.properties.read().await.firmware_version().map(String::from);
        let definition = FirmwareUpdate::definition(
            "https://fw.example.com/rebootFail",
            Duration::from_millis(1),
        )
        .unwrap();

        let outcome = run_dm_task(definition, device.clone(), CancellationToken::new()).await;
        assert_eq!(
            outcome,
            DmOutcome::Aborted {
                state: DmTaskState::FuRebooting
            }
        );

        let merged = hub.reported("dev-1");
        assert_eq!(merged["Method.UpdateFirmware.Status"].as_str(), Some(FAILED));
        assert_eq!(
            merged["Method.UpdateFirmware.Applied.Status"].as_str(),
            Some(COMPLETE)
        );
        assert_eq!(
            merged["Method.UpdateFirmware.Reboot.Status"].as_str(),
            Some(FAILED)
        );
        assert!(!merged.contains_key(reported::STARTUP_TIME));
        assert!(!merged.contains_key(reported::FIRMWARE_VERSION));
        assert_eq!(
            device.properties.read().await.firmware_version().map(String::from),
            before
        );
    }
}
