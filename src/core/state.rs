//! # Orchestrator lifecycle states.
//!
//! ```text
//! CREATED ──► STARTING ──► RUNNING ──► STOPPING ──► STOPPED
//!                 │                        ▲
//!                 └──── startup failure ───┘
//! ```

use std::fmt;

/// Lifecycle state of an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Built, `run` not called yet.
    Created,
    /// The root component is starting.
    Starting,
    /// Startup completed.
    Running,
    /// The root context is being closed.
    Stopping,
    /// Teardown finished.
    Stopped,
}

impl LifecycleState {
    /// Lowercase name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// `true` once teardown has begun.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopping | LifecycleState::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
