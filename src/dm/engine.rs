//! Driver shared by every device-management task

use crate::device::DeviceProperties;
use crate::telemetry::sleep_or_cancel;
use crate::transport::Transport;
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::state_machine::{DmTaskState, StepGraph};
use simulator_shared::PropertyMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a DM task run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmOutcome {
    /// Reached the terminal state
    Completed,
    /// A hook refused to continue, or failed
    Aborted { state: DmTaskState },
    /// The device was stopped during a step wait
    Cancelled { state: DmTaskState },
}

/// The parts of a device a DM task may touch
#[derive(Clone)]
pub struct DmDevice {
    pub device_id: String,
    pub transport: Arc<dyn Transport>,
    pub properties: Arc<RwLock<DeviceProperties>>,
}

impl DmDevice {
    /// Push a reported-properties patch; empty patches are skipped
    pub async fn report(&self, patch: PropertyMap) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.transport.update_reported_properties(patch).await
    }
}

/// Per-state callbacks of one DM task. Returning `Ok(false)` stops the task.
#[async_trait]
pub trait DmTaskHooks: Send {
    async fn on_enter(&mut self, state: DmTaskState, device: &DmDevice) -> Result<bool>;

    async fn on_leave(&mut self, state: DmTaskState, device: &DmDevice) -> Result<bool>;
}

/// A step graph plus the hooks that give its states meaning
pub struct DmTaskDefinition {
    pub name: &'static str,
    pub graph: StepGraph,
    pub hooks: Box<dyn DmTaskHooks>,
}

impl std::fmt::Debug for DmTaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmTaskDefinition")
            .field("name", &self.name)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

/// Walk the step graph from its start state until it ends, aborts, or is cancelled
pub async fn run_dm_task(
    definition: DmTaskDefinition,
    device: DmDevice,
    token: CancellationToken,
) -> DmOutcome {
    let DmTaskDefinition {
        name,
        graph,
        mut hooks,
    } = definition;
    let mut state = graph.start();
    info!(
        "[DM] {} {} started at {}, expected to take {:?}",
        device.device_id,
        name,
        state,
        graph.total_duration()
    );
    debug!(
        "[DM] {} {} path: {}",
        device.device_id,
        name,
        graph
            .path()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    loop {
        match hooks.on_enter(state, &device).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("[DM] {} {} aborted entering {}", device.device_id, name, state);
                return DmOutcome::Aborted { state };
            }
            Err(e) => {
                error!("[DM] {} {} failed entering {}: {}", device.device_id, name, state, e);
                return DmOutcome::Aborted { state };
            }
        }

        let step = match graph.step(state) {
            Some(step) => *step,
            None => {
                info!("[DM] {} {} completed", device.device_id, name);
                return DmOutcome::Completed;
            }
        };

        if !sleep_or_cancel(step.execute_time, &token).await {
            info!("[DM] {} {} cancelled in {}", device.device_id, name, state);
            return DmOutcome::Cancelled { state };
        }

        match hooks.on_leave(state, &device).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("[DM] {} {} aborted leaving {}", device.device_id, name, state);
                return DmOutcome::Aborted { state };
            }
            Err(e) => {
                error!("[DM] {} {} failed leaving {}: {}", device.device_id, name, state, e);
                return DmOutcome::Aborted { state };
            }
        }

        debug!("[DM] {} {}: {} -> {}", device.device_id, name, state, step.next);
        state = step.next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::transport::{LoopbackHub, TransportFactory};
    use simulator_shared::state_machine::DmTaskStep;
    use std::sync::Mutex;
    use std::time::Duration;
    use DmTaskState::*;

    /// Records every hook call and refuses to enter `stop_at`
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        stop_at: Option<DmTaskState>,
    }

    #[async_trait]
    impl DmTaskHooks for Recorder {
        async fn on_enter(&mut self, state: DmTaskState, _device: &DmDevice) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("enter {}", state));
            Ok(self.stop_at != Some(state))
        }

        async fn on_leave(&mut self, state: DmTaskState, _device: &DmDevice) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("leave {}", state));
            Ok(true)
        }
    }

    fn device() -> DmDevice {
        let identity = DeviceIdentity {
            device_id: "dev-1".into(),
            host_name: "hub.local".into(),
            primary_key: "key".into(),
        };
        DmDevice {
            device_id: identity.device_id.clone(),
            transport: LoopbackHub::new().create_transport(&identity).unwrap(),
            properties: Arc::new(RwLock::new(DeviceProperties::sample("dev-1"))),
        }
    }

    fn definition(step_ms: u64, recorder: Recorder) -> DmTaskDefinition {
        let graph = StepGraph::new(vec![
            DmTaskStep::new(CuPending, Duration::ZERO, CuDownloading),
            DmTaskStep::new(CuDownloading, Duration::from_millis(step_ms), CuApplying),
            DmTaskStep::new(CuApplying, Duration::from_millis(step_ms), Idle),
        ])
        .unwrap();
        DmTaskDefinition {
            name: "test",
            graph,
            hooks: Box::new(recorder),
        }
    }

    #[tokio::test]
    async fn test_runs_steps_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
            stop_at: None,
        };

        let outcome = run_dm_task(definition(1, recorder), device(), CancellationToken::new()).await;

        assert_eq!(outcome, DmOutcome::Completed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "enter cu-pending",
                "leave cu-pending",
                "enter cu-downloading",
                "leave cu-downloading",
                "enter cu-applying",
                "leave cu-applying",
                "enter idle",
            ]
        );
    }

    #[tokio::test]
    async fn test_enter_refusal_aborts() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
            stop_at: Some(CuDownloading),
        };

        let outcome = run_dm_task(definition(1, recorder), device(), CancellationToken::new()).await;

        assert_eq!(outcome, DmOutcome::Aborted { state: CuDownloading });
        assert_eq!(calls.lock().unwrap().last().unwrap(), "enter cu-downloading");
    }

    #[tokio::test]
    async fn test_cancel_during_step_wait() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
            stop_at: None,
        };
        let token = CancellationToken::new();
        let task = tokio::spawn(run_dm_task(definition(10_000, recorder), device(), token.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cancel should end the wait")
            .unwrap();
        assert_eq!(outcome, DmOutcome::Cancelled { state: CuDownloading });
        assert!(!calls.lock().unwrap().contains(&"leave cu-downloading".to_string()));
    }
}
