//! Execution adapter contract.
//!
//! An adapter is the external capability that actually runs an [`AgentTask`]
//! (a CLI agent, an API-backed agent, a test double) and reports progress as
//! a finite stream of [`AgentEvent`]s. Exactly one terminal event
//! ([`AgentEvent::Complete`] or [`AgentEvent::Error`]) ends a well-formed
//! stream; the executor also tolerates plain exhaustion.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::task::AgentTask;

/// Lifecycle event emitted by an execution adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The adapter accepted the task and started working.
    Start { session_id: Option<String> },
    /// Free-form agent output.
    Output { text: String },
    /// The agent invoked a tool.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// A tool returned a result to the agent.
    ToolResult {
        name: String,
        output: serde_json::Value,
    },
    /// The adapter failed. Terminal.
    Error { message: String },
    /// The provider rate-limited the adapter; it will back off and resume.
    RateLimit { retry_after_secs: Option<u64> },
    /// The task finished successfully. Terminal.
    Complete { result: Option<String> },
    /// The run was interrupted from outside the adapter.
    Interrupt,
}

impl AgentEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Boxed event stream returned by an adapter.
pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// An external execution capability.
///
/// `execute` may fail up front (before any event is produced); once a stream
/// is returned, failures are reported in-band as [`AgentEvent::Error`].
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn execute(&self, task: AgentTask) -> anyhow::Result<EventStream>;
}
