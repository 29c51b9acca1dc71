//! Parallel task executor with opt-in worktree isolation.
//!
//! Runs a batch of (task, adapter) pairs under a semaphore-enforced
//! concurrency cap. Every submitted item produces exactly one
//! [`ExecutionResult`]; an individual task's failure is recorded as a value
//! and never escapes the batch API. With isolation enabled, each task runs
//! against its own worktree, and release of that worktree is guaranteed on
//! every exit path — success, task failure, or a panic mid-execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::ConfigError;
use crate::events::{AgentAdapter, AgentEvent};
use crate::task::AgentTask;
use crate::worktree::WorktreeManager;

/// One unit of work for a batch: a task plus the capability that runs it.
#[derive(Clone)]
pub struct ExecutionItem {
    pub task: AgentTask,
    pub adapter: Arc<dyn AgentAdapter>,
}

impl ExecutionItem {
    pub fn new(task: AgentTask, adapter: Arc<dyn AgentAdapter>) -> Self {
        Self { task, adapter }
    }
}

/// Per-item outcome. Always produced, never thrown.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
    /// Worktree used for this task, if isolation was enabled and
    /// acquisition succeeded.
    pub worktree_id: Option<String>,
}

/// Runs agent task batches with bounded concurrency.
#[derive(Debug)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
    worktrees: Option<Arc<WorktreeManager>>,
    semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashSet<String>>>,
}

impl ParallelExecutor {
    /// Create an executor. Requesting worktree isolation without supplying
    /// a manager is a configuration error, caught here and never later.
    pub fn new(
        config: ExecutorConfig,
        worktrees: Option<Arc<WorktreeManager>>,
    ) -> Result<Self, ConfigError> {
        if config.use_worktree_isolation && worktrees.is_none() {
            return Err(ConfigError::IsolationWithoutManager);
        }

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Ok(Self {
            config,
            worktrees,
            semaphore,
            active: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    /// Execute a batch. Results come back in submission order, one per
    /// item, with failures recorded as values.
    pub async fn execute_parallel(&self, items: Vec<ExecutionItem>) -> Vec<ExecutionResult> {
        info!(
            count = items.len(),
            isolation = self.config.use_worktree_isolation,
            "Executing task batch"
        );
        join_all(items.into_iter().map(|item| self.execute_one(item))).await
    }

    /// Task ids currently in flight.
    pub async fn active_executions(&self) -> Vec<String> {
        self.active.read().await.iter().cloned().collect()
    }

    /// Clear execution bookkeeping. Cooperative only: already-dispatched
    /// adapters are not terminated.
    pub async fn cancel_all(&self) {
        let mut active = self.active.write().await;
        if !active.is_empty() {
            warn!(
                count = active.len(),
                "Clearing active execution bookkeeping; in-flight adapters are not interrupted"
            );
        }
        active.clear();
    }

    async fn execute_one(&self, item: ExecutionItem) -> ExecutionResult {
        let task_id = item.task.id.clone();

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionResult {
                    task_id,
                    success: false,
                    duration: Duration::ZERO,
                    error: Some("executor is shut down".to_string()),
                    worktree_id: None,
                };
            }
        };

        let started = Instant::now();
        self.active.write().await.insert(task_id.clone());
        debug!(task_id = %task_id, "Task execution started");

        // Acquire isolation first; a typed worktree error becomes this
        // task's failure, not the batch's.
        let mut worktree_id = None;
        let task = if let (true, Some(manager)) = (
            self.config.use_worktree_isolation,
            self.worktrees.as_deref(),
        ) {
            match manager.create_worktree(&task_id).await {
                Ok(worktree) => {
                    let task = item.task.with_repo_path(&worktree.path);
                    worktree_id = Some(worktree.id);
                    task
                }
                Err(e) => {
                    self.active.write().await.remove(&task_id);
                    warn!(task_id = %task_id, error = %e, "Worktree acquisition failed");
                    return ExecutionResult {
                        task_id,
                        success: false,
                        duration: started.elapsed(),
                        error: Some(e.to_string()),
                        worktree_id: None,
                    };
                }
            }
        } else {
            item.task.clone()
        };

        // The adapter stream is consumed in its own task so a panic surfaces
        // as a join error and still reaches the release path below.
        let adapter = item.adapter.clone();
        let consumed = tokio::spawn(async move { consume_adapter(adapter, task).await });
        let outcome = match consumed.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(format!("execution panicked: {join_err}")),
        };

        // Release runs on every exit path; a failure here is logged and
        // never changes the task's outcome.
        if let Some(ref id) = worktree_id {
            if let Some(ref manager) = self.worktrees {
                if let Err(e) = manager.remove_worktree(id).await {
                    warn!(task_id = %task_id, worktree_id = %id, error = %e, "Worktree release failed");
                }
            }
        }

        self.active.write().await.remove(&task_id);

        let duration = started.elapsed();
        match outcome {
            Ok(()) => {
                info!(task_id = %task_id, ?duration, "Task execution completed");
                ExecutionResult {
                    task_id,
                    success: true,
                    duration,
                    error: None,
                    worktree_id,
                }
            }
            Err(error) => {
                warn!(task_id = %task_id, error = %error, "Task execution failed");
                ExecutionResult {
                    task_id,
                    success: false,
                    duration,
                    error: Some(error),
                    worktree_id,
                }
            }
        }
    }
}

/// Pull adapter events until a terminal event or stream exhaustion.
/// Exhaustion without a terminal event counts as success: no failure was
/// observed.
async fn consume_adapter(adapter: Arc<dyn AgentAdapter>, task: AgentTask) -> Result<(), String> {
    let task_id = task.id.clone();
    let mut stream = adapter.execute(task).await.map_err(|e| e.to_string())?;

    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::Complete { .. } => return Ok(()),
            AgentEvent::Error { message } => return Err(message),
            event => {
                debug!(task_id = %task_id, event = ?event, "Adapter event");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::events::EventStream;
    use crate::task::ProjectContext;

    fn make_task(id: &str) -> AgentTask {
        AgentTask::new(
            "prompt",
            ProjectContext {
                project_id: "proj".to_string(),
                repo_path: "/tmp/repo".into(),
                repo_key: "acme/repo".to_string(),
                context_file: None,
            },
        )
        .with_id(id)
    }

    /// Adapter that replays a fixed event script with a fixed per-event
    /// delay, recording the repo path each task arrived with.
    struct ScriptedAdapter {
        events: Vec<AgentEvent>,
        delay: Duration,
        seen_repo_paths: Arc<Mutex<Vec<PathBuf>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ScriptedAdapter {
        fn completing() -> Self {
            Self::with_events(vec![
                AgentEvent::Start { session_id: None },
                AgentEvent::Output {
                    text: "working".to_string(),
                },
                AgentEvent::Complete { result: None },
            ])
        }

        fn with_events(events: Vec<AgentEvent>) -> Self {
            Self {
                events,
                delay: Duration::ZERO,
                seen_repo_paths: Arc::new(Mutex::new(Vec::new())),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl AgentAdapter for ScriptedAdapter {
        async fn execute(&self, task: AgentTask) -> anyhow::Result<EventStream> {
            self.seen_repo_paths
                .lock()
                .await
                .push(task.project.repo_path.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = self.delay;
            let in_flight = self.in_flight.clone();
            let events = self.events.clone();
            let count = events.len();
            let stream = tokio_stream::iter(events.into_iter().enumerate()).then(
                move |(index, event)| {
                    let in_flight = in_flight.clone();
                    async move {
                        tokio::time::sleep(delay).await;
                        if index + 1 == count {
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                        }
                        event
                    }
                },
            );
            Ok(Box::pin(stream))
        }
    }

    #[tokio::test]
    async fn batch_reports_every_item_in_order() {
        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();

        let good = Arc::new(ScriptedAdapter::completing());
        let bad = Arc::new(ScriptedAdapter::with_events(vec![
            AgentEvent::Start { session_id: None },
            AgentEvent::Error {
                message: "adapter blew up".to_string(),
            },
        ]));

        let results = executor
            .execute_parallel(vec![
                ExecutionItem::new(make_task("t1"), good.clone()),
                ExecutionItem::new(make_task("t2"), bad),
                ExecutionItem::new(make_task("t3"), good),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].task_id, "t1");
        assert!(results[0].success);
        assert_eq!(results[1].task_id, "t2");
        assert!(!results[1].success);
        assert_eq!(results[1].error.as_deref(), Some("adapter blew up"));
        assert_eq!(results[2].task_id, "t3");
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let executor = ParallelExecutor::new(
            ExecutorConfig {
                max_concurrency: 2,
                use_worktree_isolation: false,
            },
            None,
        )
        .unwrap();

        let adapter =
            Arc::new(ScriptedAdapter::completing().with_delay(Duration::from_millis(10)));
        let items: Vec<ExecutionItem> = (0..6)
            .map(|i| ExecutionItem::new(make_task(&format!("t{i}")), adapter.clone()))
            .collect();

        let results = executor.execute_parallel(items).await;
        assert!(results.iter().all(|r| r.success));
        assert!(adapter.peak.load(Ordering::SeqCst) <= 2, "bound violated");
    }

    #[tokio::test]
    async fn isolation_without_manager_is_a_config_error() {
        let err = ParallelExecutor::new(
            ExecutorConfig {
                max_concurrency: 2,
                use_worktree_isolation: true,
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::IsolationWithoutManager));
    }

    #[tokio::test]
    async fn active_executions_empty_after_batch() {
        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();
        let adapter = Arc::new(ScriptedAdapter::completing());

        let results = executor
            .execute_parallel(vec![
                ExecutionItem::new(make_task("t1"), adapter.clone()),
                ExecutionItem::new(make_task("t2"), adapter),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert!(executor.active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn failing_execute_call_is_a_task_failure() {
        struct RefusingAdapter;

        #[async_trait]
        impl AgentAdapter for RefusingAdapter {
            async fn execute(&self, _task: AgentTask) -> anyhow::Result<EventStream> {
                anyhow::bail!("no session available")
            }
        }

        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();
        let results = executor
            .execute_parallel(vec![ExecutionItem::new(
                make_task("t1"),
                Arc::new(RefusingAdapter),
            )])
            .await;

        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("no session"));
    }

    #[tokio::test]
    async fn panicking_stream_is_a_task_failure() {
        struct PanickingAdapter;

        #[async_trait]
        impl AgentAdapter for PanickingAdapter {
            async fn execute(&self, _task: AgentTask) -> anyhow::Result<EventStream> {
                let stream = tokio_stream::iter([AgentEvent::Start { session_id: None }])
                    .map(|_| -> AgentEvent { panic!("adapter bug") });
                Ok(Box::pin(stream))
            }
        }

        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();
        let results = executor
            .execute_parallel(vec![ExecutionItem::new(
                make_task("t1"),
                Arc::new(PanickingAdapter),
            )])
            .await;

        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("panicked"));
        assert!(executor.active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_stream_without_terminal_event_is_success() {
        let adapter = Arc::new(ScriptedAdapter::with_events(vec![
            AgentEvent::Start { session_id: None },
            AgentEvent::Output {
                text: "partial".to_string(),
            },
        ]));

        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();
        let results = executor
            .execute_parallel(vec![ExecutionItem::new(make_task("t1"), adapter)])
            .await;

        assert!(results[0].success);
        assert!(results[0].error.is_none());
    }

    #[tokio::test]
    async fn tasks_keep_their_repo_path_without_isolation() {
        let adapter = Arc::new(ScriptedAdapter::completing());
        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();

        executor
            .execute_parallel(vec![ExecutionItem::new(make_task("t1"), adapter.clone())])
            .await;

        let seen = adapter.seen_repo_paths.lock().await;
        assert_eq!(*seen, [PathBuf::from("/tmp/repo")]);
    }

    #[tokio::test]
    async fn cancel_all_clears_bookkeeping() {
        let executor = ParallelExecutor::new(ExecutorConfig::default(), None).unwrap();
        executor.active.write().await.insert("ghost".to_string());
        executor.cancel_all().await;
        assert!(executor.active_executions().await.is_empty());
    }
}
