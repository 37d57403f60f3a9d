//! Supervises the running devices: one task and one cancellation token per device

use crate::device::{DeviceError, DeviceRuntime};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

struct FleetEntry {
    device: Arc<DeviceRuntime>,
    token: CancellationToken,
    handle: JoinHandle<Result<(), DeviceError>>,
    instance: u64,
}

#[derive(Default)]
struct FleetState {
    running: HashMap<String, FleetEntry>,
    /// IDs taken out of `running` whose task has not ended yet
    stopping: HashSet<String>,
}

pub struct FleetManager {
    state: Mutex<FleetState>,
    next_instance: AtomicU64,
    stop_timeout: Duration,
}

impl FleetManager {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(FleetState::default()),
            next_instance: AtomicU64::new(1),
            stop_timeout,
        }
    }

    /// Spawn one task per device and return the IDs actually started.
    /// IDs that are running or still stopping are skipped.
    #[instrument(skip(self, devices), fields(count = devices.len()))]
    pub async fn start_devices(&self, devices: Vec<DeviceRuntime>) -> Vec<String> {
        let mut started = Vec::new();
        let mut skipped = Vec::new();

        {
            let mut state = self.state.lock().await;
            for device in devices {
                let device_id = device.device_id().to_string();
                if state.running.contains_key(&device_id) {
                    warn!(device_id = %device_id, "[FLEET] device already running, skipping");
                    skipped.push(device);
                    continue;
                }
                if state.stopping.contains(&device_id) {
                    warn!(device_id = %device_id, "[FLEET] device still stopping, skipping");
                    skipped.push(device);
                    continue;
                }

                let device = Arc::new(device);
                let token = CancellationToken::new();
                let handle = tokio::spawn({
                    let device = device.clone();
                    let token = token.clone();
                    async move { device.start(token).await }
                });
                let instance = self.next_instance.fetch_add(1, Ordering::SeqCst);

                info!(device_id = %device_id, instance, "[FLEET] device started");
                state.running.insert(
                    device_id.clone(),
                    FleetEntry {
                        device,
                        token,
                        handle,
                        instance,
                    },
                );
                started.push(device_id);
            }
        }

        for device in skipped {
            device.dispose();
            device.close_transport().await;
        }
        started
    }

    /// Cancel the given devices and wait for each to wind down
    #[instrument(skip(self), fields(count = device_ids.len()))]
    pub async fn stop_devices(&self, device_ids: &[String]) {
        let entries: Vec<(String, FleetEntry)> = {
            let mut state = self.state.lock().await;
            let mut entries = Vec::new();
            for id in device_ids {
                match state.running.remove(id) {
                    Some(entry) => {
                        state.stopping.insert(id.clone());
                        entries.push((id.clone(), entry));
                    }
                    None => {
                        warn!(device_id = %id, "[FLEET] device not running, nothing to stop");
                    }
                }
            }
            entries
        };
        self.stop_entries(entries).await;
    }

    #[instrument(skip(self))]
    pub async fn stop_all_devices(&self) {
        let entries: Vec<(String, FleetEntry)> = {
            let mut state = self.state.lock().await;
            let entries: Vec<(String, FleetEntry)> = state.running.drain().collect();
            for (id, _) in &entries {
                state.stopping.insert(id.clone());
            }
            entries
        };
        self.stop_entries(entries).await;
    }

    async fn stop_entries(&self, entries: Vec<(String, FleetEntry)>) {
        for (_, entry) in &entries {
            entry.token.cancel();
        }
        let stopped = join_all(
            entries
                .into_iter()
                .map(|(device_id, entry)| self.wait_stopped(device_id, entry)),
        )
        .await;

        let mut state = self.state.lock().await;
        for device_id in stopped {
            state.stopping.remove(&device_id);
        }
    }

    /// Wait for the device task to end. A task that outlives the stop
    /// timeout is aborted and its transport closed here.
    async fn wait_stopped(&self, device_id: String, mut entry: FleetEntry) -> String {
        let waited = tokio::time::timeout(self.stop_timeout, &mut entry.handle).await;
        match waited {
            Ok(Ok(Ok(()))) => {
                debug!(device_id = %device_id, "[FLEET] device stopped");
            }
            Ok(Ok(Err(e))) => {
                error!(device_id = %device_id, error = %e, "[FLEET] device ended with error");
            }
            Ok(Err(e)) => {
                error!(device_id = %device_id, error = ?e, "[FLEET] device task panicked");
            }
            Err(_) => {
                warn!(device_id = %device_id, "[FLEET] device did not stop within timeout, aborting");
                entry.device.dispose();
                entry.handle.abort();
                match entry.handle.await {
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        error!(device_id = %device_id, error = ?e, "[FLEET] device task panicked")
                    }
                    Ok(_) => {}
                }
                entry.device.close_transport().await;
            }
        }
        device_id
    }

    /// IDs of running devices. Tasks that already ended are reaped and logged.
    pub async fn get_live_devices(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let finished: Vec<String> = state
            .running
            .iter()
            .filter(|(_, entry)| entry.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for device_id in finished {
            if let Some(entry) = state.running.remove(&device_id) {
                match entry.handle.await {
                    Ok(Ok(())) => info!(device_id = %device_id, "[FLEET] device completed"),
                    Ok(Err(e)) => {
                        error!(device_id = %device_id, error = %e, "[FLEET] device faulted")
                    }
                    Err(e) => {
                        error!(device_id = %device_id, error = ?e, "[FLEET] device task panicked")
                    }
                }
            }
        }

        let mut live: Vec<String> = state.running.keys().cloned().collect();
        live.sort();
        live
    }

    /// Instance number of the running context for `device_id`
    pub async fn instance_of(&self, device_id: &str) -> Option<u64> {
        self.state
            .lock()
            .await
            .running
            .get(device_id)
            .map(|entry| entry.instance)
    }
}
