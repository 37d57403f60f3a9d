//! Device-management tasks: long-running operations reported step by step

pub mod configuration;
mod engine;
pub mod firmware;
mod progress;

pub use configuration::ConfigurationUpdate;
pub use engine::{run_dm_task, DmDevice, DmOutcome, DmTaskDefinition, DmTaskHooks};
pub use firmware::FirmwareUpdate;
pub use progress::ProgressRecord;

use simulator_shared::state_machine::GraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmTaskError {
    #[error("invalid package URI: {0}")]
    InvalidUri(String),

    #[error("malformed step graph: {0}")]
    Graph(#[from] GraphError),
}
