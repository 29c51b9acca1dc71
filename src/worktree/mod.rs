//! Git worktree lifecycle management.
//!
//! Owns the task → isolated-working-copy mapping. Each worktree is a
//! separate checkout plus its own branch carved from the shared base
//! repository, so concurrent tasks can mutate files without colliding. The
//! base repository is only read during creation and tolerates concurrent
//! reads.
//!
//! All git invocations go through argument vectors; nothing is ever passed
//! to a shell.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::WorktreeConfig;
use crate::error::WorktreeError;

/// Length of the random id suffix.
const ID_SUFFIX_LEN: usize = 6;

/// A live, registered worktree.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeInfo {
    /// Unique id: task id + millisecond timestamp + random suffix. Repeated
    /// calls for the same task id yield distinct worktrees.
    pub id: String,
    /// Checkout directory.
    pub path: PathBuf,
    /// Branch the checkout is bound to.
    pub branch: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Creates and removes isolated git worktrees for agent tasks.
#[derive(Debug)]
pub struct WorktreeManager {
    config: WorktreeConfig,
    worktrees: RwLock<HashMap<String, WorktreeInfo>>,
}

impl WorktreeManager {
    /// Create a manager for one base repository.
    pub fn new(config: WorktreeConfig) -> Self {
        Self {
            config,
            worktrees: RwLock::new(HashMap::new()),
        }
    }

    /// Create a worktree and branch for a task.
    ///
    /// Verifies the base repository first and fails `NotGitRepository` with
    /// no side effects if it is not one. Any failure mid-creation removes
    /// the partially created directory before surfacing `CreationFailed`.
    pub async fn create_worktree(&self, task_id: &str) -> Result<WorktreeInfo, WorktreeError> {
        self.verify_repository().await?;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        let id = format!("{}-{}-{}", task_id, Utc::now().timestamp_millis(), suffix);
        let branch = format!("agent/{id}");
        let path = self.worktree_root().join(&id);

        tokio::fs::create_dir_all(self.worktree_root())
            .await
            .map_err(|e| WorktreeError::CreationFailed {
                id: id.clone(),
                reason: format!("failed to create worktree root: {e}"),
            })?;

        let path_arg = path.to_string_lossy().to_string();
        let output = self
            .git(&[
                "worktree",
                "add",
                "-b",
                &branch,
                &path_arg,
                &self.config.base_branch,
            ])
            .await;

        let failure = match &output {
            Ok(out) if out.status.success() => None,
            Ok(out) => Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            // Leave no partial state behind.
            if path.exists() {
                let _ = tokio::fs::remove_dir_all(&path).await;
            }
            return Err(WorktreeError::CreationFailed { id, reason });
        }

        let info = WorktreeInfo {
            id: id.clone(),
            path,
            branch,
            created_at: Utc::now(),
        };
        self.worktrees.write().await.insert(id.clone(), info.clone());

        info!(
            worktree_id = %id,
            path = %info.path.display(),
            branch = %info.branch,
            "Worktree created"
        );
        Ok(info)
    }

    /// Remove a worktree and delete its branch.
    ///
    /// Unknown ids are a no-op. Branch deletion failure is ignored —
    /// directory removal is the operation whose success matters. On failure
    /// the mapping is kept so the caller may retry.
    pub async fn remove_worktree(&self, id: &str) -> Result<(), WorktreeError> {
        let info = self.worktrees.read().await.get(id).cloned();
        let Some(info) = info else {
            debug!(worktree_id = %id, "Unknown worktree, nothing to remove");
            return Ok(());
        };

        let path_arg = info.path.to_string_lossy().to_string();
        let mut failure: Option<String> = None;
        match self.git(&["worktree", "remove", "--force", &path_arg]).await {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                debug!(worktree_id = %id, error = %stderr, "git worktree remove failed, removing directory directly");
                if let Err(e) = tokio::fs::remove_dir_all(&info.path).await {
                    if info.path.exists() {
                        failure = Some(format!("{stderr}; {e}"));
                    }
                }
                // Drop the stale administrative record for the checkout.
                let _ = self.git(&["worktree", "prune"]).await;
            }
            Err(e) => failure = Some(e.to_string()),
        }

        if let Some(reason) = failure {
            return Err(WorktreeError::RemovalFailed {
                id: id.to_string(),
                reason,
            });
        }

        if let Ok(out) = self.git(&["branch", "-D", &info.branch]).await {
            if !out.status.success() {
                debug!(
                    worktree_id = %id,
                    branch = %info.branch,
                    "Branch deletion failed, ignoring"
                );
            }
        }

        self.worktrees.write().await.remove(id);
        info!(worktree_id = %id, "Worktree removed");
        Ok(())
    }

    /// Snapshot of all live worktrees.
    pub async fn list_worktrees(&self) -> Vec<WorktreeInfo> {
        let mut out: Vec<WorktreeInfo> = self.worktrees.read().await.values().cloned().collect();
        out.sort_by_key(|w| w.created_at);
        out
    }

    /// Look up a live worktree.
    pub async fn get_worktree(&self, id: &str) -> Option<WorktreeInfo> {
        self.worktrees.read().await.get(id).cloned()
    }

    /// Remove every live worktree, attempting all regardless of individual
    /// failures. Returns the number removed.
    pub async fn cleanup_all(&self) -> usize {
        let ids: Vec<String> = self.worktrees.read().await.keys().cloned().collect();
        self.remove_batch(ids).await
    }

    /// Remove worktrees older than `max_age`, attempting all regardless of
    /// individual failures. Returns the number removed.
    pub async fn cleanup_old(&self, max_age: Duration) -> usize {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let ids: Vec<String> = self
            .worktrees
            .read()
            .await
            .values()
            .filter(|w| w.created_at < cutoff)
            .map(|w| w.id.clone())
            .collect();
        self.remove_batch(ids).await
    }

    async fn remove_batch(&self, ids: Vec<String>) -> usize {
        let mut removed = 0;
        for id in ids {
            match self.remove_worktree(&id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(worktree_id = %id, error = %e, "Worktree cleanup failed"),
            }
        }
        removed
    }

    /// Resolve the worktree root; a relative root is anchored at the base
    /// repository.
    fn worktree_root(&self) -> PathBuf {
        if self.config.worktree_root.is_absolute() {
            self.config.worktree_root.clone()
        } else {
            self.config.repo_path.join(&self.config.worktree_root)
        }
    }

    async fn verify_repository(&self) -> Result<(), WorktreeError> {
        let valid = match self.git(&["rev-parse", "--git-dir"]).await {
            Ok(out) => out.status.success(),
            Err(_) => false,
        };
        if valid {
            Ok(())
        } else {
            Err(WorktreeError::NotGitRepository {
                path: self.config.repo_path.clone(),
            })
        }
    }

    async fn git(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.config.repo_path)
            .output()
            .await
    }
}
