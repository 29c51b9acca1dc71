//! Configuration types.
//!
//! Every component is constructed with explicit configuration; there is no
//! ambient global state. Defaults are tuned for interactive use.

use std::path::PathBuf;
use std::time::Duration;

/// Task queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,
    /// Maximum number of tracked tasks before `add` is rejected.
    pub max_queue_size: usize,
    /// Number of retries after the first failed attempt.
    pub retry_attempts: u32,
    /// Fixed delay before a failed task is rescheduled.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_queue_size: 100,
            retry_attempts: 2,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Parallel executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of tasks executing at once.
    pub max_concurrency: usize,
    /// Run each task in its own git worktree. Requires a worktree manager.
    pub use_worktree_isolation: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            use_worktree_isolation: false,
        }
    }
}

/// Worktree manager configuration.
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// The shared base repository worktrees are carved from.
    pub repo_path: PathBuf,
    /// Directory where worktree checkouts are created.
    pub worktree_root: PathBuf,
    /// Branch new worktree branches fork from.
    pub base_branch: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            worktree_root: PathBuf::from(".conductor/worktrees"),
            base_branch: "main".to_string(),
        }
    }
}
