//! Error types for the orchestration core.

use std::path::PathBuf;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worktree error: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors, raised at construction time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Worktree isolation enabled but no worktree manager was supplied")]
    IsolationWithoutManager,

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task queue admission errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full: already tracking {max} tasks")]
    QueueFull { max: usize },

    #[error("Queue has been shut down")]
    ShutDown,
}

/// Worktree lifecycle errors.
///
/// `NotGitRepository` and `CreationFailed` are fatal for the attempt and
/// leave no partial state behind. `RemovalFailed` is recoverable: the
/// mapping is kept so the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Not a git repository: {path}")]
    NotGitRepository { path: PathBuf },

    #[error("Failed to create worktree {id}: {reason}")]
    CreationFailed { id: String, reason: String },

    #[error("Failed to remove worktree {id}: {reason}")]
    RemovalFailed { id: String, reason: String },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
