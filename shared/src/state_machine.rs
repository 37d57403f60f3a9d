//! Device Management Task State Machine
//!
//! A DM task is a fixed chain of timed steps ending in [`DmTaskState::Idle`].
//! The chain is declared as data and validated once at construction, so the
//! driver never has to cope with a malformed graph.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// States a device-management task can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmTaskState {
    /// Terminal state shared by every task
    Idle,
    FuPending,
    FuDownloading,
    FuApplying,
    FuRebooting,
    CuPending,
    CuDownloading,
    CuApplying,
}

impl DmTaskState {
    pub fn is_terminal(self) -> bool {
        self == DmTaskState::Idle
    }
}

impl fmt::Display for DmTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DmTaskState::Idle => "idle",
            DmTaskState::FuPending => "fu-pending",
            DmTaskState::FuDownloading => "fu-downloading",
            DmTaskState::FuApplying => "fu-applying",
            DmTaskState::FuRebooting => "fu-rebooting",
            DmTaskState::CuPending => "cu-pending",
            DmTaskState::CuDownloading => "cu-downloading",
            DmTaskState::CuApplying => "cu-applying",
        };
        f.write_str(name)
    }
}

/// One edge of the step graph: stay in `current` for `execute_time`, then move to `next`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmTaskStep {
    pub current: DmTaskState,
    pub execute_time: Duration,
    pub next: DmTaskState,
}

impl DmTaskStep {
    pub fn new(current: DmTaskState, execute_time: Duration, next: DmTaskState) -> Self {
        Self {
            current,
            execute_time,
            next,
        }
    }
}

/// Reasons a step list is not a valid task graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("step list is empty")]
    Empty,

    #[error("terminal state {0} must not have a step")]
    TerminalHasStep(DmTaskState),

    #[error("state {0} has more than one step")]
    DuplicateState(DmTaskState),

    #[error("step {from} leads to {to}, which has no step")]
    DanglingState { from: DmTaskState, to: DmTaskState },

    #[error("state {0} is visited twice before reaching idle")]
    Cycle(DmTaskState),

    #[error("state {0} is not reachable from the start state")]
    Unreachable(DmTaskState),
}

/// A validated, totally ordered chain of DM task steps
#[derive(Debug, Clone)]
pub struct StepGraph {
    steps: Vec<DmTaskStep>,
}

impl StepGraph {
    /// Validate a step list; the first step's state becomes the start state
    pub fn new(steps: Vec<DmTaskStep>) -> Result<Self, GraphError> {
        let first = steps.first().ok_or(GraphError::Empty)?;

        let mut seen = HashSet::new();
        for step in &steps {
            if step.current.is_terminal() {
                return Err(GraphError::TerminalHasStep(step.current));
            }
            if !seen.insert(step.current) {
                return Err(GraphError::DuplicateState(step.current));
            }
        }

        for step in &steps {
            if !step.next.is_terminal() && !seen.contains(&step.next) {
                return Err(GraphError::DanglingState {
                    from: step.current,
                    to: step.next,
                });
            }
        }

        let mut visited = HashSet::new();
        let mut state = first.current;
        while !state.is_terminal() {
            if !visited.insert(state) {
                return Err(GraphError::Cycle(state));
            }
            // every non-terminal state was checked to have a step above
            state = match steps.iter().find(|s| s.current == state) {
                Some(step) => step.next,
                None => break,
            };
        }

        if let Some(orphan) = steps.iter().find(|s| !visited.contains(&s.current)) {
            return Err(GraphError::Unreachable(orphan.current));
        }

        Ok(Self { steps })
    }

    /// The state a task enters first
    pub fn start(&self) -> DmTaskState {
        self.steps[0].current
    }

    /// The step leaving `state`, or `None` for the terminal state
    pub fn step(&self, state: DmTaskState) -> Option<&DmTaskStep> {
        self.steps.iter().find(|s| s.current == state)
    }

    /// Every state visited by a full run, start to terminal inclusive
    pub fn path(&self) -> Vec<DmTaskState> {
        let mut path = vec![self.start()];
        let mut state = self.start();
        while let Some(step) = self.step(state) {
            state = step.next;
            path.push(state);
        }
        path
    }

    /// Sum of all step durations
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.execute_time).sum()
    }
}

/// Append-only list of phase descriptions rendered as `a -> b -> c`
///
/// A segment appended as temporary is dropped by the next append, which lets
/// a phase show "downloading" while it runs and "downloaded" once it is done.
#[derive(Debug, Default, Clone)]
pub struct ProgressLog {
    segments: Vec<String>,
    last_is_temporary: bool,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment and return the rendered log
    pub fn append(&mut self, segment: impl Into<String>, temporary: bool) -> String {
        if self.last_is_temporary {
            self.segments.pop();
        }
        self.segments.push(segment.into());
        self.last_is_temporary = temporary;
        self.render()
    }

    pub fn render(&self) -> String {
        self.segments.join(" -> ")
    }
}
