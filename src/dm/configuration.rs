//! Configuration update: pending -> downloading -> applying -> idle

use super::engine::{DmDevice, DmTaskDefinition, DmTaskHooks};
use super::progress::{ProgressRecord, COMPLETE, FAILED, RUNNING};
use super::DmTaskError;
use crate::device::properties::reported;
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::state_machine::{DmTaskState, DmTaskStep, StepGraph};
use simulator_shared::{PropertyMap, Value};
use std::time::Duration;
use tracing::info;
use url::Url;

pub const COMMAND_NAME: &str = "ConfigurationUpdate";
pub const URI_PARAMETER: &str = "ConfigUri";
pub const REPORT_PREFIX: &str = "Method.ConfigurationUpdate";

const VERSION_MARKER: &str = "/configuration/";

/// Configuration version carried by a URI: the whole path after `/configuration/`
pub fn version_from_uri(uri: &str) -> Result<String, DmTaskError> {
    let url = Url::parse(uri).map_err(|e| DmTaskError::InvalidUri(format!("{}: {}", uri, e)))?;
    let path = url.path();
    path.find(VERSION_MARKER)
        .map(|at| &path[at + VERSION_MARKER.len()..])
        .filter(|version| !version.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DmTaskError::InvalidUri(format!("{}: no /configuration/<version>", uri)))
}

/// Hooks of one configuration update run
pub struct ConfigurationUpdate {
    version: String,
    progress: ProgressRecord,
}

impl ConfigurationUpdate {
    pub fn definition(uri: &str, step: Duration) -> Result<DmTaskDefinition, DmTaskError> {
        let version = version_from_uri(uri)?;
        let graph = StepGraph::new(vec![
            DmTaskStep::new(DmTaskState::CuPending, Duration::ZERO, DmTaskState::CuDownloading),
            DmTaskStep::new(DmTaskState::CuDownloading, step, DmTaskState::CuApplying),
            DmTaskStep::new(DmTaskState::CuApplying, step, DmTaskState::Idle),
        ])?;

        Ok(DmTaskDefinition {
            name: COMMAND_NAME,
            graph,
            hooks: Box::new(ConfigurationUpdate {
                version,
                progress: ProgressRecord::new(REPORT_PREFIX),
            }),
        })
    }

    fn enter_phase(&mut self, patch: &mut PropertyMap, running: &str, failed: &str, marker: &str) -> bool {
        self.progress.restart_step();
        let succeed = !self.version.ends_with(marker);
        if succeed {
            self.progress.log(patch, running, true);
            self.progress.status(patch, RUNNING);
        } else {
            self.progress.log(patch, failed, false);
            self.progress.status(patch, FAILED);
        }
        succeed
    }
}

#[async_trait]
impl DmTaskHooks for ConfigurationUpdate {
    async fn on_enter(&mut self, state: DmTaskState, device: &DmDevice) -> Result<bool> {
        let mut patch = PropertyMap::new();
        let succeed = match state {
            DmTaskState::CuPending => {
                self.progress.restart();
                self.progress.status(&mut patch, RUNNING);
                true
            }
            DmTaskState::CuDownloading => {
                self.enter_phase(&mut patch, "Downloading", "Download failed", "downloadFail")
            }
            DmTaskState::CuApplying => {
                self.enter_phase(&mut patch, "Applying", "Apply failed", "applyFail")
            }
            DmTaskState::Idle => {
                device
                    .properties
                    .write()
                    .await
                    .set_configuration_version(self.version.clone());
                self.progress.status(&mut patch, COMPLETE);
                patch.insert(
                    reported::CONFIGURATION_VERSION.into(),
                    Value::text(self.version.clone()),
                );
                info!("[DM] {} configuration now {}", device.device_id, self.version);
                true
            }
            other => anyhow::bail!("configuration update has no state {}", other),
        };

        device.report(patch).await?;
        Ok(succeed)
    }

    async fn on_leave(&mut self, state: DmTaskState, device: &DmDevice) -> Result<bool> {
        let mut patch = PropertyMap::new();
        let done = match state {
            DmTaskState::CuDownloading => Some("Downloaded"),
            DmTaskState::CuApplying => Some("Applied"),
            _ => None,
        };
        if let Some(done) = done {
            let segment = format!("{}({}s)", done, self.progress.step_elapsed_secs());
            self.progress.log(&mut patch, segment, false);
        }
        device.report(patch).await?;
        Ok(true)
    }
}
