//! Device registries: where the desired device list comes from

use crate::device::DeviceIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// One desired device as listed in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitialDeviceConfig {
    pub host_name: String,
    pub device_id: String,
    pub key: String,
}

impl From<&InitialDeviceConfig> for DeviceIdentity {
    fn from(config: &InitialDeviceConfig) -> Self {
        DeviceIdentity {
            device_id: config.device_id.clone(),
            host_name: config.host_name.clone(),
            primary_key: config.key.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get_device_list(&self) -> Result<Vec<InitialDeviceConfig>, RegistryError>;
}

/// In-memory registry whose list can be swapped at runtime
pub struct StaticDeviceRegistry {
    devices: Mutex<Result<Vec<InitialDeviceConfig>, String>>,
}

impl StaticDeviceRegistry {
    pub fn new(devices: Vec<InitialDeviceConfig>) -> Self {
        Self {
            devices: Mutex::new(Ok(devices)),
        }
    }

    pub fn set_devices(&self, devices: Vec<InitialDeviceConfig>) {
        *self.devices.lock().unwrap_or_else(PoisonError::into_inner) = Ok(devices);
    }

    /// Make every lookup fail until the next `set_devices`
    pub fn set_unavailable(&self, reason: impl Into<String>) {
        *self.devices.lock().unwrap_or_else(PoisonError::into_inner) = Err(reason.into());
    }
}

impl Default for StaticDeviceRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl DeviceRegistry for StaticDeviceRegistry {
    async fn get_device_list(&self) -> Result<Vec<InitialDeviceConfig>, RegistryError> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map_err(RegistryError::Unavailable)
    }
}

/// Reads a JSON array of devices from disk on every lookup
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    path: PathBuf,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeviceRegistry for JsonFileRegistry {
    async fn get_device_list(&self) -> Result<Vec<InitialDeviceConfig>, RegistryError> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_slice(&contents).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}
