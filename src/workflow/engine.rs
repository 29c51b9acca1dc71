//! Workflow execution engine.
//!
//! Executes a [`WorkflowDefinition`]'s step tree against a shared context,
//! racing the whole run against the definition's timeout. Failures and
//! timeouts are encoded in the returned [`WorkflowResult`]; `execute` never
//! returns an error for a step's failure.
//!
//! Cancellation is cooperative: `cancel` flags the active execution and the
//! sequential evaluator checks the flag between children. In-flight steps
//! are not interrupted, and a timed-out step tree keeps running in the
//! background until its current steps settle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::task::AgentTask;

use super::context::{StepResult, StepStatus, WorkflowContext};
use super::step::{WorkflowDefinition, WorkflowStep};

/// Broadcast capacity for lifecycle events.
const EVENT_CAPACITY: usize = 256;

/// Injected per-task executor. `Ok(output)` marks the step completed;
/// `Err` marks it failed.
pub type TaskExecutor = Arc<
    dyn Fn(AgentTask) -> Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`TaskExecutor`].
pub fn task_executor<F, Fut>(f: F) -> TaskExecutor
where
    F: Fn(AgentTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(
        move |task| -> Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>> {
            Box::pin(f(task))
        },
    )
}

/// Terminal status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// Outcome of one settled step, in settlement order.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub status: StepStatus,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

/// Result of a workflow execution.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Steps that settled before the workflow was finalized.
    pub steps: Vec<StepOutcome>,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Lifecycle event emitted during execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted { workflow_id: String },
    StepStarted { workflow_id: String, step_id: String },
    StepCompleted { workflow_id: String, step_id: String },
    StepFailed {
        workflow_id: String,
        step_id: String,
        error: String,
    },
    WorkflowCompleted { workflow_id: String },
    WorkflowFailed { workflow_id: String, error: String },
    WorkflowTimeout { workflow_id: String },
    WorkflowCancelled { workflow_id: String },
}

/// Step-tree propagation result. Distinguishes a step failure from a
/// cooperative cancellation so the final status is reported correctly.
enum StepError {
    Failed(String),
    Cancelled,
}

struct ActiveWorkflow {
    cancel_requested: Arc<AtomicBool>,
}

/// Everything a step needs while executing, cloned down the tree.
#[derive(Clone)]
struct StepDeps {
    workflow_id: String,
    executor: TaskExecutor,
    ctx: Arc<RwLock<WorkflowContext>>,
    outcomes: Arc<Mutex<Vec<StepOutcome>>>,
    cancel: Arc<AtomicBool>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl StepDeps {
    fn emit(&self, event: WorkflowEvent) {
        // Ok if no receivers are listening.
        let _ = self.events.send(event);
    }

    async fn record(
        &self,
        step_id: &str,
        status: StepStatus,
        output: serde_json::Value,
        error: Option<String>,
    ) {
        self.ctx.write().await.results.insert(
            step_id.to_string(),
            StepResult {
                status,
                output: output.clone(),
            },
        );
        self.outcomes.lock().await.push(StepOutcome {
            step_id: step_id.to_string(),
            status,
            output,
            error,
        });
    }
}

/// Executes workflow definitions against an injected task executor.
pub struct WorkflowEngine {
    executor: TaskExecutor,
    active: Arc<RwLock<HashMap<String, ActiveWorkflow>>>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowEngine {
    /// Create an engine around a per-task executor.
    pub fn new(executor: TaskExecutor) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            executor,
            active: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Subscribe to lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Ids of currently tracked executions.
    pub async fn active_workflows(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    /// Request cancellation of an active execution. Returns false when no
    /// execution with that id is tracked. Cancellation is cooperative; the
    /// flag is honored between steps, not inside them.
    pub async fn cancel(&self, workflow_id: &str) -> bool {
        let active = self.active.read().await;
        match active.get(workflow_id) {
            Some(workflow) => {
                workflow.cancel_requested.store(true, Ordering::SeqCst);
                info!(workflow_id = %workflow_id, "Workflow cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Execute a workflow to a terminal [`WorkflowResult`].
    ///
    /// Step failures, timeout, and cancellation are all encoded in the
    /// result's status, never raised.
    pub async fn execute(&self, definition: WorkflowDefinition) -> WorkflowResult {
        let workflow_id = definition.id.clone();
        let started = Instant::now();

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.active.write().await;
            if active.contains_key(&workflow_id) {
                warn!(workflow_id = %workflow_id, "Workflow is already running");
                return WorkflowResult {
                    workflow_id: workflow_id.clone(),
                    status: WorkflowStatus::Failed,
                    steps: Vec::new(),
                    error: Some(format!("workflow {workflow_id} is already running")),
                    duration: started.elapsed(),
                };
            }
            active.insert(
                workflow_id.clone(),
                ActiveWorkflow {
                    cancel_requested: cancel.clone(),
                },
            );
        }

        info!(workflow_id = %workflow_id, name = %definition.name, "Workflow started");
        let deps = StepDeps {
            workflow_id: workflow_id.clone(),
            executor: self.executor.clone(),
            ctx: Arc::new(RwLock::new(WorkflowContext::new(&workflow_id))),
            outcomes: Arc::new(Mutex::new(Vec::new())),
            cancel,
            events: self.events.clone(),
        };
        deps.emit(WorkflowEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
        });

        // The step tree runs in its own task: a timeout finalizes the
        // result early but does not kill in-flight steps.
        let tree = tokio::spawn(run_step(definition.root, deps.clone()));
        let joined = match definition.timeout {
            Some(limit) => match tokio::time::timeout(limit, tree).await {
                Ok(joined) => Some(joined),
                Err(_) => None,
            },
            None => Some(tree.await),
        };

        let (status, error) = match joined {
            None => (
                WorkflowStatus::Timeout,
                Some(format!(
                    "workflow deadline of {:?} exceeded",
                    definition.timeout.unwrap_or_default()
                )),
            ),
            Some(Err(join_err)) => (
                WorkflowStatus::Failed,
                Some(format!("step execution panicked: {join_err}")),
            ),
            Some(Ok(Ok(()))) => (WorkflowStatus::Completed, None),
            Some(Ok(Err(StepError::Failed(message)))) => {
                (WorkflowStatus::Failed, Some(message))
            }
            Some(Ok(Err(StepError::Cancelled))) => (
                WorkflowStatus::Cancelled,
                Some("workflow cancelled".to_string()),
            ),
        };

        self.active.write().await.remove(&workflow_id);

        match status {
            WorkflowStatus::Completed => {
                info!(workflow_id = %workflow_id, "Workflow completed");
                deps.emit(WorkflowEvent::WorkflowCompleted {
                    workflow_id: workflow_id.clone(),
                });
            }
            WorkflowStatus::Failed => {
                warn!(workflow_id = %workflow_id, error = ?error, "Workflow failed");
                deps.emit(WorkflowEvent::WorkflowFailed {
                    workflow_id: workflow_id.clone(),
                    error: error.clone().unwrap_or_default(),
                });
            }
            WorkflowStatus::Timeout => {
                warn!(workflow_id = %workflow_id, "Workflow timed out");
                deps.emit(WorkflowEvent::WorkflowTimeout {
                    workflow_id: workflow_id.clone(),
                });
            }
            WorkflowStatus::Cancelled => {
                info!(workflow_id = %workflow_id, "Workflow cancelled");
                deps.emit(WorkflowEvent::WorkflowCancelled {
                    workflow_id: workflow_id.clone(),
                });
            }
        }

        let steps = deps.outcomes.lock().await.clone();
        WorkflowResult {
            workflow_id,
            status,
            steps,
            error,
            duration: started.elapsed(),
        }
    }
}

fn run_step(step: WorkflowStep, deps: StepDeps) -> BoxFuture<'static, Result<(), StepError>> {
    Box::pin(async move {
        if deps.cancel.load(Ordering::SeqCst) {
            return Err(StepError::Cancelled);
        }

        match step {
            WorkflowStep::Task { id, task } => {
                deps.emit(WorkflowEvent::StepStarted {
                    workflow_id: deps.workflow_id.clone(),
                    step_id: id.clone(),
                });
                debug!(workflow_id = %deps.workflow_id, step_id = %id, task_id = %task.id, "Task step started");

                match (deps.executor)(task).await {
                    Ok(output) => {
                        deps.record(&id, StepStatus::Completed, output, None).await;
                        deps.emit(WorkflowEvent::StepCompleted {
                            workflow_id: deps.workflow_id.clone(),
                            step_id: id,
                        });
                        Ok(())
                    }
                    Err(e) => {
                        let message = format!("step {id} failed: {e}");
                        deps.record(
                            &id,
                            StepStatus::Failed,
                            serde_json::Value::Null,
                            Some(e.to_string()),
                        )
                        .await;
                        deps.emit(WorkflowEvent::StepFailed {
                            workflow_id: deps.workflow_id.clone(),
                            step_id: id,
                            error: e.to_string(),
                        });
                        Err(StepError::Failed(message))
                    }
                }
            }

            WorkflowStep::Sequential { id, steps } => {
                deps.emit(WorkflowEvent::StepStarted {
                    workflow_id: deps.workflow_id.clone(),
                    step_id: id.clone(),
                });

                // Fail-fast: the first failing child aborts the rest.
                for child in steps {
                    if deps.cancel.load(Ordering::SeqCst) {
                        return Err(StepError::Cancelled);
                    }
                    if let Err(e) = run_step(child, deps.clone()).await {
                        if let StepError::Failed(ref message) = e {
                            deps.record(
                                &id,
                                StepStatus::Failed,
                                serde_json::Value::Null,
                                Some(message.clone()),
                            )
                            .await;
                            deps.emit(WorkflowEvent::StepFailed {
                                workflow_id: deps.workflow_id.clone(),
                                step_id: id.clone(),
                                error: message.clone(),
                            });
                        }
                        return Err(e);
                    }
                }

                deps.record(&id, StepStatus::Completed, serde_json::Value::Null, None)
                    .await;
                deps.emit(WorkflowEvent::StepCompleted {
                    workflow_id: deps.workflow_id.clone(),
                    step_id: id,
                });
                Ok(())
            }

            WorkflowStep::Parallel { id, steps } => {
                deps.emit(WorkflowEvent::StepStarted {
                    workflow_id: deps.workflow_id.clone(),
                    step_id: id.clone(),
                });

                // Every child settles before the step does; siblings are not
                // cancelled on the first failure.
                let total = steps.len();
                let settled = join_all(
                    steps
                        .into_iter()
                        .map(|child| run_step(child, deps.clone())),
                )
                .await;

                let failed = settled
                    .iter()
                    .filter(|r| matches!(r, Err(StepError::Failed(_))))
                    .count();
                let cancelled = settled
                    .iter()
                    .any(|r| matches!(r, Err(StepError::Cancelled)));

                if failed > 0 {
                    let message = format!("{failed} of {total} parallel steps failed");
                    deps.record(
                        &id,
                        StepStatus::Failed,
                        serde_json::Value::Null,
                        Some(message.clone()),
                    )
                    .await;
                    deps.emit(WorkflowEvent::StepFailed {
                        workflow_id: deps.workflow_id.clone(),
                        step_id: id,
                        error: message.clone(),
                    });
                    Err(StepError::Failed(message))
                } else if cancelled {
                    Err(StepError::Cancelled)
                } else {
                    deps.record(&id, StepStatus::Completed, serde_json::Value::Null, None)
                        .await;
                    deps.emit(WorkflowEvent::StepCompleted {
                        workflow_id: deps.workflow_id.clone(),
                        step_id: id,
                    });
                    Ok(())
                }
            }

            WorkflowStep::Branch {
                id,
                condition,
                then_step,
                else_step,
            } => {
                deps.emit(WorkflowEvent::StepStarted {
                    workflow_id: deps.workflow_id.clone(),
                    step_id: id.clone(),
                });

                let taken = {
                    let ctx = deps.ctx.read().await;
                    condition(&ctx)
                };
                debug!(workflow_id = %deps.workflow_id, step_id = %id, taken, "Branch evaluated");

                let result = if taken {
                    run_step(*then_step, deps.clone()).await
                } else if let Some(else_step) = else_step {
                    run_step(*else_step, deps.clone()).await
                } else {
                    // No else branch: the step is a successful no-op.
                    Ok(())
                };

                match result {
                    Ok(()) => {
                        deps.record(&id, StepStatus::Completed, serde_json::Value::Null, None)
                            .await;
                        deps.emit(WorkflowEvent::StepCompleted {
                            workflow_id: deps.workflow_id.clone(),
                            step_id: id,
                        });
                        Ok(())
                    }
                    Err(e) => {
                        if let StepError::Failed(ref message) = e {
                            deps.record(
                                &id,
                                StepStatus::Failed,
                                serde_json::Value::Null,
                                Some(message.clone()),
                            )
                            .await;
                            deps.emit(WorkflowEvent::StepFailed {
                                workflow_id: deps.workflow_id.clone(),
                                step_id: id,
                                error: message.clone(),
                            });
                        }
                        Err(e)
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;
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

    /// Executor that fails for tasks whose id starts with `fail`, recording
    /// every invocation.
    fn recording_executor(invoked: Arc<Mutex<Vec<String>>>) -> TaskExecutor {
        task_executor(move |task: AgentTask| {
            let invoked = invoked.clone();
            async move {
                invoked.lock().await.push(task.id.clone());
                if task.id.starts_with("fail") {
                    anyhow::bail!("task {} exploded", task.id)
                }
                Ok(serde_json::json!({"task": task.id}))
            }
        })
    }

    #[tokio::test]
    async fn sequential_is_fail_fast() {
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::new(recording_executor(invoked.clone()));

        let definition = WorkflowDefinition::new(
            "wf-seq",
            "sequential",
            WorkflowStep::sequential(
                "root",
                vec![
                    WorkflowStep::task("a", make_task("fail-a")),
                    WorkflowStep::task("b", make_task("b")),
                ],
            ),
        );

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(*invoked.lock().await, ["fail-a"]);
        assert!(result.error.unwrap().contains("step a failed"));
    }

    #[tokio::test]
    async fn parallel_runs_all_children_despite_failure() {
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::new(recording_executor(invoked.clone()));

        let definition = WorkflowDefinition::new(
            "wf-par",
            "parallel",
            WorkflowStep::parallel(
                "root",
                vec![
                    WorkflowStep::task("a", make_task("fail-a")),
                    WorkflowStep::task("b", make_task("b")),
                ],
            ),
        );

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Failed);

        let mut ran = invoked.lock().await.clone();
        ran.sort();
        assert_eq!(ran, ["b", "fail-a"]);

        // B's outcome is recorded even though A failed.
        let b = result.steps.iter().find(|s| s.step_id == "b").unwrap();
        assert_eq!(b.status, StepStatus::Completed);
        assert_eq!(b.output["task"], "b");
    }

    #[tokio::test]
    async fn branch_takes_then_on_true() {
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::new(recording_executor(invoked.clone()));

        let definition = WorkflowDefinition::new(
            "wf-branch",
            "branch",
            WorkflowStep::branch(
                "cond",
                |_ctx| true,
                WorkflowStep::task("then", make_task("then-task")),
                Some(WorkflowStep::task("else", make_task("else-task"))),
            ),
        );

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(*invoked.lock().await, ["then-task"]);
    }

    #[tokio::test]
    async fn branch_takes_else_on_false() {
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::new(recording_executor(invoked.clone()));

        let definition = WorkflowDefinition::new(
            "wf-branch",
            "branch",
            WorkflowStep::branch(
                "cond",
                |_ctx| false,
                WorkflowStep::task("then", make_task("then-task")),
                Some(WorkflowStep::task("else", make_task("else-task"))),
            ),
        );

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(*invoked.lock().await, ["else-task"]);
    }

    #[tokio::test]
    async fn branch_without_else_is_noop() {
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::new(recording_executor(invoked.clone()));

        let definition = WorkflowDefinition::new(
            "wf-branch",
            "branch",
            WorkflowStep::branch(
                "cond",
                |_ctx| false,
                WorkflowStep::task("then", make_task("then-task")),
                None,
            ),
        );

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(invoked.lock().await.is_empty());
        let cond = result.steps.iter().find(|s| s.step_id == "cond").unwrap();
        assert_eq!(cond.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn branch_reads_prior_step_results() {
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::new(recording_executor(invoked.clone()));

        let definition = WorkflowDefinition::new(
            "wf-ctx",
            "context",
            WorkflowStep::sequential(
                "root",
                vec![
                    WorkflowStep::task("probe", make_task("probe")),
                    WorkflowStep::branch(
                        "cond",
                        |ctx| ctx.step_succeeded("probe"),
                        WorkflowStep::task("then", make_task("follow-up")),
                        None,
                    ),
                ],
            ),
        );

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(*invoked.lock().await, ["probe", "follow-up"]);
    }

    #[tokio::test]
    async fn exceeding_timeout_yields_timeout_status() {
        let engine = WorkflowEngine::new(task_executor(|_task| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(serde_json::Value::Null)
        }));

        let definition = WorkflowDefinition::new(
            "wf-slow",
            "slow",
            WorkflowStep::task("slow", make_task("slow")),
        )
        .with_timeout(Duration::from_millis(50));

        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Timeout);
        assert!(result.error.unwrap().contains("deadline"));
        assert!(engine.active_workflows().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_between_steps() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let invoked = Arc::new(AtomicUsize::new(0));
        let (gate2, entered2, invoked2) = (gate.clone(), entered.clone(), invoked.clone());

        let engine = Arc::new(WorkflowEngine::new(task_executor(move |_task| {
            let gate = gate2.clone();
            let entered = entered2.clone();
            let invoked = invoked2.clone();
            async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                entered.notify_one();
                gate.notified().await;
                Ok(serde_json::Value::Null)
            }
        })));

        let definition = WorkflowDefinition::new(
            "wf-cancel",
            "cancel",
            WorkflowStep::sequential(
                "root",
                vec![
                    WorkflowStep::task("a", make_task("a")),
                    WorkflowStep::task("b", make_task("b")),
                ],
            ),
        );

        let engine2 = engine.clone();
        let run = tokio::spawn(async move { engine2.execute(definition).await });

        entered.notified().await;
        assert!(engine.cancel("wf-cancel").await);
        gate.notify_one();

        let result = run.await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Cancelled);
        // Step A ran; step B was skipped by the cancellation check.
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert!(engine.active_workflows().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_workflow_returns_false() {
        let engine = WorkflowEngine::new(task_executor(|_task| async {
            Ok(serde_json::Value::Null)
        }));
        assert!(!engine.cancel("missing").await);
    }

    #[tokio::test]
    async fn lifecycle_events_in_order() {
        let engine = WorkflowEngine::new(task_executor(|_task| async {
            Ok(serde_json::Value::Null)
        }));
        let mut events = engine.subscribe();

        let definition = WorkflowDefinition::new(
            "wf-events",
            "events",
            WorkflowStep::task("only", make_task("only")),
        );
        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Completed);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], WorkflowEvent::WorkflowStarted { .. }));
        assert!(matches!(seen[1], WorkflowEvent::StepStarted { .. }));
        assert!(matches!(seen[2], WorkflowEvent::StepCompleted { .. }));
        assert!(matches!(seen[3], WorkflowEvent::WorkflowCompleted { .. }));
    }

    #[tokio::test]
    async fn duplicate_execution_is_rejected() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let (gate2, entered2) = (gate.clone(), entered.clone());

        let engine = Arc::new(WorkflowEngine::new(task_executor(move |_task| {
            let gate = gate2.clone();
            let entered = entered2.clone();
            async move {
                entered.notify_one();
                gate.notified().await;
                Ok(serde_json::Value::Null)
            }
        })));

        let definition = WorkflowDefinition::new(
            "wf-dup",
            "dup",
            WorkflowStep::task("only", make_task("only")),
        );

        let engine2 = engine.clone();
        let first = tokio::spawn({
            let definition = definition.clone();
            async move { engine2.execute(definition).await }
        });
        entered.notified().await;

        let second = engine.execute(definition).await;
        assert_eq!(second.status, WorkflowStatus::Failed);
        assert!(second.error.unwrap().contains("already running"));

        gate.notify_one();
        assert_eq!(first.await.unwrap().status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn no_timeout_waits_for_completion() {
        let engine = WorkflowEngine::new(task_executor(|_task| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(serde_json::json!("done"))
        }));

        let definition = WorkflowDefinition::new(
            "wf-patient",
            "patient",
            WorkflowStep::task("slow", make_task("slow")),
        );
        let result = engine.execute(definition).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        let slow = result.steps.iter().find(|s| s.step_id == "slow").unwrap();
        assert_eq!(slow.output, serde_json::json!("done"));
    }
}
