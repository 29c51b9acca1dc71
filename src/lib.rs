//! Conductor — agent task orchestration core.
//!
//! Bounded-concurrency execution of AI agent tasks against code
//! repositories: a priority task queue with retry, a workflow engine for
//! composable multi-step plans, a parallel executor with per-task git
//! worktree isolation, and the worktree lifecycle manager underneath it.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod task;
pub mod workflow;
pub mod worktree;

pub use config::{ExecutorConfig, QueueConfig, WorktreeConfig};
pub use error::{ConfigError, Error, QueueError, Result, WorktreeError};
pub use events::{AgentAdapter, AgentEvent, EventStream};
pub use executor::{ExecutionItem, ExecutionResult, ParallelExecutor};
pub use queue::{QueueStats, QueuedTask, TaskQueue, TaskStatus};
pub use task::{AgentTask, ExecutionOptions, ProjectContext};
pub use workflow::{
    WorkflowContext, WorkflowDefinition, WorkflowEngine, WorkflowResult, WorkflowStatus,
    WorkflowStep,
};
pub use worktree::{WorktreeInfo, WorktreeManager};
