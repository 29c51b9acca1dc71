//! Workflow step definitions.
//!
//! A workflow is a tree of immutable steps supplied by the caller: `task`
//! leaves, `sequential` and `parallel` composites, and `branch` nodes whose
//! predicate reads the live workflow context.

use std::sync::Arc;
use std::time::Duration;

use crate::task::AgentTask;

use super::context::WorkflowContext;

/// Branch predicate, evaluated against the context at the moment the branch
/// step runs. Results of earlier steps are visible.
pub type BranchCondition = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

/// A node in the workflow step tree.
#[derive(Clone)]
pub enum WorkflowStep {
    /// Leaf: run a single agent task through the injected executor.
    Task { id: String, task: AgentTask },
    /// Run children strictly in order; the first failure aborts the rest.
    Sequential {
        id: String,
        steps: Vec<WorkflowStep>,
    },
    /// Run children concurrently; every child settles before the step does.
    Parallel {
        id: String,
        steps: Vec<WorkflowStep>,
    },
    /// Evaluate `condition`; run `then_step` on true, `else_step` (if any)
    /// on false, otherwise succeed as a no-op.
    Branch {
        id: String,
        condition: BranchCondition,
        then_step: Box<WorkflowStep>,
        else_step: Option<Box<WorkflowStep>>,
    },
}

impl WorkflowStep {
    /// Leaf task step.
    pub fn task(id: impl Into<String>, task: AgentTask) -> Self {
        Self::Task {
            id: id.into(),
            task,
        }
    }

    /// Ordered composite.
    pub fn sequential(id: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self::Sequential {
            id: id.into(),
            steps,
        }
    }

    /// Concurrent composite.
    pub fn parallel(id: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self::Parallel {
            id: id.into(),
            steps,
        }
    }

    /// Conditional step.
    pub fn branch<F>(
        id: impl Into<String>,
        condition: F,
        then_step: WorkflowStep,
        else_step: Option<WorkflowStep>,
    ) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        Self::Branch {
            id: id.into(),
            condition: Arc::new(condition),
            then_step: Box::new(then_step),
            else_step: else_step.map(Box::new),
        }
    }

    /// This step's id.
    pub fn id(&self) -> &str {
        match self {
            Self::Task { id, .. }
            | Self::Sequential { id, .. }
            | Self::Parallel { id, .. }
            | Self::Branch { id, .. } => id,
        }
    }
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task { id, task } => f
                .debug_struct("Task")
                .field("id", id)
                .field("task", &task.id)
                .finish(),
            Self::Sequential { id, steps } => f
                .debug_struct("Sequential")
                .field("id", id)
                .field("steps", steps)
                .finish(),
            Self::Parallel { id, steps } => f
                .debug_struct("Parallel")
                .field("id", id)
                .field("steps", steps)
                .finish(),
            Self::Branch {
                id,
                then_step,
                else_step,
                ..
            } => f
                .debug_struct("Branch")
                .field("id", id)
                .field("then_step", then_step)
                .field("else_step", else_step)
                .finish(),
        }
    }
}

/// A complete workflow: a root step plus an optional wall-clock deadline for
/// the whole execution. No deadline means the workflow waits indefinitely.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Workflow id; at most one execution per id is tracked at a time.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Root of the step tree.
    pub root: WorkflowStep,
    /// Deadline for the whole execution.
    pub timeout: Option<Duration>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, root: WorkflowStep) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            root,
            timeout: None,
        }
    }

    /// Set the workflow-level timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
