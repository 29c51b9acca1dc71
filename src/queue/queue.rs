//! Priority task queue — bounded-concurrency scheduling with fixed-delay retry.
//!
//! Candidate selection is strict priority, FIFO within a tier. A dedicated
//! scheduler loop (woken by [`Notify`]) admits tasks while the running count
//! is below the configured concurrency; every completion re-triggers
//! scheduling. Failed tasks are requeued after a fixed delay until their
//! retry budget is spent. One task's failure never affects the others.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::task::AgentTask;

use super::status::TaskStatus;

/// How often `drain` polls for quiescence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handler invoked for each dispatched task. An `Err` counts against the
/// task's retry budget.
pub type TaskHandler = Arc<
    dyn Fn(AgentTask) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync,
>;

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(AgentTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |task| -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
        Box::pin(f(task))
    })
}

/// Queue-owned wrapper around a submitted task.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedTask {
    /// Task id (same as `task.id`).
    pub id: String,
    /// The submitted task, untouched by the queue.
    pub task: AgentTask,
    /// Higher runs sooner.
    pub priority: i32,
    /// When the task was enqueued.
    pub added_at: DateTime<Utc>,
    /// When the current (or last) handler invocation started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: TaskStatus,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Last recorded handler error.
    pub error: Option<String>,
    /// Monotonic enqueue sequence; FIFO tie-break within a priority tier.
    #[serde(skip)]
    seq: u64,
    /// Earliest time a retry may be dispatched.
    #[serde(skip)]
    retry_at: Option<DateTime<Utc>>,
}

/// Per-status counts plus totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

struct QueueInner {
    config: QueueConfig,
    tasks: RwLock<HashMap<String, QueuedTask>>,
    /// Ids with a handler invocation in flight. Source of truth for the
    /// concurrency bound; a mid-flight cancel flips the status but the slot
    /// is held until the handler returns.
    running: RwLock<HashSet<String>>,
    handler: RwLock<Option<TaskHandler>>,
    wake: Notify,
    next_seq: AtomicU64,
    shut_down: AtomicBool,
}

/// Priority-ordered, concurrency-bounded task queue with retry.
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a new queue and start its scheduler loop.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let inner = Arc::new(QueueInner {
            config,
            tasks: RwLock::new(HashMap::new()),
            running: RwLock::new(HashSet::new()),
            handler: RwLock::new(None),
            wake: Notify::new(),
            next_seq: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        });

        tokio::spawn(Self::scheduler_loop(inner.clone()));

        Arc::new(Self { inner })
    }

    /// Install or replace the execution handler.
    pub async fn set_handler(&self, handler: TaskHandler) {
        *self.inner.handler.write().await = Some(handler);
        self.inner.wake.notify_one();
    }

    /// Enqueue a task. Returns the task id, or `QueueFull` if the queue
    /// already tracks its configured maximum.
    pub async fn add(&self, task: AgentTask, priority: i32) -> Result<String, QueueError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }

        let id = task.id.clone();
        {
            let mut tasks = self.inner.tasks.write().await;
            if tasks.len() >= self.inner.config.max_queue_size {
                return Err(QueueError::QueueFull {
                    max: self.inner.config.max_queue_size,
                });
            }

            tasks.insert(
                id.clone(),
                QueuedTask {
                    id: id.clone(),
                    task,
                    priority,
                    added_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    status: TaskStatus::Queued,
                    retry_count: 0,
                    error: None,
                    seq: self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
                    retry_at: None,
                },
            );
        }

        debug!(task_id = %id, priority, "Task enqueued");
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Cancel a task. Returns false for unknown ids and tasks already in a
    /// terminal status. A running task is only flagged — its handler is not
    /// interrupted, and its concurrency slot is held until it returns.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.inner.tasks.write().await;
        let Some(task) = tasks.get_mut(id) else {
            return false;
        };
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return false;
        }

        let previous = task.status;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        info!(task_id = %id, previous = %previous, "Task cancelled");
        true
    }

    /// Get a snapshot of a tracked task.
    pub async fn get_task(&self, id: &str) -> Option<QueuedTask> {
        self.inner.tasks.read().await.get(id).cloned()
    }

    /// Get snapshots of tracked tasks, optionally filtered by status,
    /// ordered by enqueue time.
    pub async fn get_tasks(&self, status: Option<TaskStatus>) -> Vec<QueuedTask> {
        let tasks = self.inner.tasks.read().await;
        let mut out: Vec<QueuedTask> = tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.seq);
        out
    }

    /// Per-status counts.
    pub async fn stats(&self) -> QueueStats {
        let tasks = self.inner.tasks.read().await;
        let mut stats = QueueStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.total = tasks.len();
        stats
    }

    /// Wait until nothing is queued or running. Cooperative poll, intended
    /// for graceful shutdown and tests.
    pub async fn drain(&self) {
        loop {
            let busy = {
                let tasks = self.inner.tasks.read().await;
                tasks
                    .values()
                    .any(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Running))
            } || !self.inner.running.read().await.is_empty();

            if !busy {
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Purge all terminal-status entries. Returns the number removed.
    pub async fn cleanup(&self) -> usize {
        let mut tasks = self.inner.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| !t.status.is_terminal());
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "Purged terminal tasks");
        }
        removed
    }

    /// Stop the scheduler loop. Already-dispatched handlers run to
    /// completion; queued tasks are no longer admitted.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    async fn scheduler_loop(inner: Arc<QueueInner>) {
        loop {
            if inner.shut_down.load(Ordering::SeqCst) {
                debug!("Queue scheduler stopped");
                return;
            }
            Self::dispatch_ready(&inner).await;
            inner.wake.notified().await;
        }
    }

    /// Admit queued tasks while a concurrency slot and a handler are
    /// available. The scheduler loop is the only dispatcher, so
    /// check-then-claim races only against `cancel`, which the status guard
    /// covers.
    async fn dispatch_ready(inner: &Arc<QueueInner>) {
        loop {
            let Some(handler) = inner.handler.read().await.clone() else {
                return;
            };

            if inner.running.read().await.len() >= inner.config.concurrency {
                return;
            }

            let now = Utc::now();
            let next = {
                let tasks = inner.tasks.read().await;
                tasks
                    .values()
                    .filter(|t| {
                        t.status == TaskStatus::Queued
                            && t.retry_at.is_none_or(|at| at <= now)
                    })
                    .max_by_key(|t| (t.priority, std::cmp::Reverse(t.seq)))
                    .map(|t| t.id.clone())
            };
            let Some(id) = next else {
                return;
            };

            let claimed = {
                let mut tasks = inner.tasks.write().await;
                match tasks.get_mut(&id) {
                    Some(t) if t.status == TaskStatus::Queued => {
                        t.status = TaskStatus::Running;
                        t.started_at = Some(Utc::now());
                        Some(t.task.clone())
                    }
                    _ => None,
                }
            };
            let Some(task) = claimed else {
                continue;
            };

            inner.running.write().await.insert(id.clone());
            info!(task_id = %id, "Dispatching task");

            let inner = inner.clone();
            tokio::spawn(async move {
                Self::run_task(inner, id, task, handler).await;
            });
        }
    }

    async fn run_task(inner: Arc<QueueInner>, id: String, task: AgentTask, handler: TaskHandler) {
        // The handler runs in its own task so a panic surfaces as a join
        // error instead of leaking the concurrency slot.
        let outcome = match tokio::spawn(handler(task)).await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::anyhow!("task handler panicked: {join_err}")),
        };

        let mut delayed_retry = false;
        {
            let mut tasks = inner.tasks.write().await;
            if let Some(t) = tasks.get_mut(&id) {
                match (&outcome, t.status) {
                    (_, TaskStatus::Cancelled) => {
                        // Cancelled mid-flight; the terminal status stands.
                        debug!(task_id = %id, "Handler finished after cancellation");
                    }
                    (Ok(()), TaskStatus::Running) => {
                        t.status = TaskStatus::Completed;
                        t.completed_at = Some(Utc::now());
                        info!(task_id = %id, "Task completed");
                    }
                    (Err(e), TaskStatus::Running) => {
                        t.error = Some(e.to_string());
                        if t.retry_count < inner.config.retry_attempts {
                            t.retry_count += 1;
                            t.status = TaskStatus::Queued;
                            t.started_at = None;
                            t.retry_at = Some(
                                Utc::now()
                                    + chrono::Duration::from_std(inner.config.retry_delay)
                                        .unwrap_or_else(|_| chrono::Duration::zero()),
                            );
                            delayed_retry = true;
                            warn!(
                                task_id = %id,
                                attempt = t.retry_count,
                                error = %e,
                                "Task failed, retry scheduled"
                            );
                        } else {
                            t.status = TaskStatus::Failed;
                            t.completed_at = Some(Utc::now());
                            warn!(task_id = %id, error = %e, "Task failed, retries exhausted");
                        }
                    }
                    _ => {}
                }
            }
        }

        inner.running.write().await.remove(&id);

        if delayed_retry {
            let inner = inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(inner.config.retry_delay).await;
                inner.wake.notify_one();
            });
        }
        // Every completion re-triggers scheduling; the freed slot may admit
        // other queued work immediately.
        inner.wake.notify_one();
    }
}
