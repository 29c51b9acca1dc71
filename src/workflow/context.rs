//! Workflow execution context.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Recorded outcome of a single step, keyed by step id in the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// `completed` or `failed`.
    pub status: StepStatus,
    /// Executor output for task steps; `null` for composites.
    pub output: serde_json::Value,
}

/// Status of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Shared state a workflow execution accumulates.
///
/// Results are written as steps settle and are readable by later branch
/// conditions; they only ever grow during an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Id of the owning workflow.
    pub workflow_id: String,
    /// Caller-supplied variables, available to branch conditions.
    pub variables: HashMap<String, serde_json::Value>,
    /// Per-step results, keyed by step id.
    pub results: HashMap<String, StepResult>,
}

impl WorkflowContext {
    /// Fresh context for one execution.
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            variables: HashMap::new(),
            results: HashMap::new(),
        }
    }

    /// Set a variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Result recorded for a step, if it has settled.
    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    /// Whether a step settled successfully.
    pub fn step_succeeded(&self, step_id: &str) -> bool {
        self.results
            .get(step_id)
            .is_some_and(|r| r.status == StepStatus::Completed)
    }
}
