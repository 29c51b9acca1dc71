//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Status of a queued task.
///
/// Transitions are monotone: `Queued → Running → {Completed, Failed,
/// Cancelled}`, `Queued → Cancelled`, plus the retry edge `Running → Queued`.
/// No transition leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be dispatched.
    Queued,
    /// Handler invocation in flight.
    Running,
    /// Handler finished successfully.
    Completed,
    /// Handler failed and retries are exhausted.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // From Queued
            (Queued, Running) | (Queued, Cancelled) |
            // From Running; Queued is the retry edge
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) | (Running, Queued)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}
