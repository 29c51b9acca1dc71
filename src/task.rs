//! Agent task types.
//!
//! An [`AgentTask`] is an immutable unit of AI-assisted work against a code
//! repository. The core never mutates a submitted task; when isolation is in
//! play the executor derives a modified copy via [`AgentTask::with_repo_path`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Project a task runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project identifier.
    pub project_id: String,
    /// Path to the working copy the task operates on.
    pub repo_path: PathBuf,
    /// Stable key naming the repository (e.g. `org/repo`).
    pub repo_key: String,
    /// Optional project context file handed to the agent (e.g. `AGENTS.md`).
    pub context_file: Option<String>,
}

/// Knobs passed through to the execution adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Model override for this task.
    pub model: Option<String>,
    /// Cap on agent turns before the adapter gives up.
    pub max_turns: Option<u32>,
    /// Allow running against a dirty working copy.
    pub allow_dirty: bool,
}

/// A single unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique task id.
    pub id: String,
    /// The instruction given to the agent.
    pub prompt: String,
    /// Project the task runs against.
    pub project: ProjectContext,
    /// Session to resume, if any.
    pub session_id: Option<String>,
    /// Optional execution options.
    pub options: Option<ExecutionOptions>,
}

impl AgentTask {
    /// Create a task with a generated id.
    pub fn new(prompt: impl Into<String>, project: ProjectContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            project,
            session_id: None,
            options: None,
        }
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set a session to resume.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set execution options.
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Derive a copy of this task pointed at a different working copy.
    ///
    /// Used by the executor to redirect a task into its isolated worktree.
    pub fn with_repo_path(&self, repo_path: impl AsRef<Path>) -> Self {
        let mut task = self.clone();
        task.project.repo_path = repo_path.as_ref().to_path_buf();
        task
    }
}
