// ABOUTME: Execution coordinator that turns triggered workflows into tracked runs
// ABOUTME: Expands each run into a dependency-ordered concurrent task graph and finalizes its outcome

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::context::RunContext;
use super::dependency::DependencyGraph;
use super::dispatch::TaskDispatcher;
use super::error::{ExecutionError, Result};
use super::result::{Run, RunStatus, RunTrigger, TaskRun, TaskStatus};
use crate::parser::{DefinitionLoader, RunParams, TaskConfig, Workflow};
use crate::tasks::TaskExecutor;

/// Terminal state of a task as seen by its dependents: `None` while the task
/// has not finished, `Some(true)` on success, `Some(false)` otherwise.
type CompletionSignal = Option<bool>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_concurrent_runs: usize,
    pub max_concurrent_tasks: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 10,
            max_concurrent_tasks: 5,
        }
    }
}

struct RunEntry {
    run: Run,
    /// Live task state while the run executes
    context: Option<Arc<RunContext>>,
}

/// State shared between the coordinator handle and its spawned runs.
struct Shared {
    runs: RwLock<HashMap<String, RunEntry>>,
    dispatcher: Arc<TaskDispatcher>,
    run_slots: Arc<Semaphore>,
    finished: Notify,
}

pub struct ExecutionCoordinator {
    loader: Arc<DefinitionLoader>,
    shared: Arc<Shared>,
    in_flight: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

impl ExecutionCoordinator {
    pub fn new(
        loader: Arc<DefinitionLoader>,
        executor: Arc<TaskExecutor>,
        config: CoordinatorConfig,
    ) -> Self {
        let dispatcher = Arc::new(TaskDispatcher::new(executor, config.max_concurrent_tasks));
        let shared = Arc::new(Shared {
            runs: RwLock::new(HashMap::new()),
            dispatcher,
            run_slots: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            finished: Notify::new(),
        });

        Self {
            loader,
            shared,
            in_flight: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Create a pending run for `workflow_id` and queue it for execution.
    ///
    /// Returns the new run id without waiting for any task to run.
    #[instrument(skip(self, params))]
    pub async fn start_run(
        &self,
        workflow_id: &str,
        params: RunParams,
        trigger: RunTrigger,
    ) -> Result<String> {
        let workflow = self
            .loader
            .get(workflow_id)
            .await
            .ok_or_else(|| ExecutionError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        let mut in_flight = self.in_flight.lock().await;
        if !self.is_accepting() {
            return Err(ExecutionError::ShuttingDown);
        }
        while in_flight.try_join_next().is_some() {}

        let run_id = uuid::Uuid::new_v4().to_string();
        {
            let mut runs = self.shared.runs.write().await;

            if let Some(limit) = workflow.max_active_runs {
                let active = runs
                    .values()
                    .filter(|e| e.run.workflow_id == workflow_id && e.run.status.is_active())
                    .count();
                if active >= limit {
                    warn!(
                        "Rejecting run of {}: {} active run(s), limit {}",
                        workflow_id, active, limit
                    );
                    return Err(ExecutionError::ConstraintViolation {
                        workflow_id: workflow_id.to_string(),
                        reason: format!("maxActiveRuns limit of {} reached", limit),
                    });
                }
            }

            let mut run = Run::new(run_id.clone(), workflow_id, trigger, params);
            run.tasks = workflow
                .tasks
                .iter()
                .map(|task| TaskRun::new(task.task_id.clone(), task.kind.as_str()))
                .collect();
            runs.insert(run_id.clone(), RunEntry { run, context: None });
        }

        info!("Accepted {} run {} of workflow {}", trigger, run_id, workflow_id);
        in_flight.spawn(process_run(Arc::clone(&self.shared), run_id.clone(), workflow));

        Ok(run_id)
    }

    /// Current view of a run, including live task states while it executes.
    pub async fn get_run(&self, run_id: &str) -> Option<Run> {
        let (mut run, context) = {
            let runs = self.shared.runs.read().await;
            let entry = runs.get(run_id)?;
            (entry.run.clone(), entry.context.clone())
        };
        if let Some(ctx) = context {
            run.tasks = ctx.snapshot().await;
        }
        Some(run)
    }

    /// All known runs, oldest first.
    pub async fn get_all_runs(&self) -> Vec<Run> {
        let ids: Vec<String> = self.shared.runs.read().await.keys().cloned().collect();

        let mut all = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(run) = self.get_run(&id).await {
                all.push(run);
            }
        }
        all.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        all
    }

    /// Number of pending or running runs of a workflow.
    pub async fn active_runs(&self, workflow_id: &str) -> usize {
        self.shared
            .runs
            .read()
            .await
            .values()
            .filter(|e| e.run.workflow_id == workflow_id && e.run.status.is_active())
            .count()
    }

    /// Wait until a run reaches a terminal status and return it.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<Run> {
        loop {
            let finished = self.shared.finished.notified();
            let run = self
                .get_run(run_id)
                .await
                .ok_or_else(|| ExecutionError::RunNotFound {
                    run_id: run_id.to_string(),
                })?;
            if run.is_finished() {
                return Ok(run);
            }
            finished.await;
        }
    }

    /// Stop accepting runs and wait for every in-flight run to finish.
    pub async fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().await);

        info!("Coordinator closing; draining {} run(s)", in_flight.len());
        drain(&mut in_flight).await;
        info!("Coordinator closed");
    }

    /// Like `close`, but cancels runs still executing after `timeout`.
    /// Returns the ids of the runs that were cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> Vec<String> {
        self.accepting.store(false, Ordering::SeqCst);
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().await);

        info!(
            "Coordinator shutting down; waiting up to {:?} for {} run(s)",
            timeout,
            in_flight.len()
        );

        if tokio::time::timeout(timeout, drain(&mut in_flight))
            .await
            .is_ok()
        {
            info!("All runs finished before shutdown timeout");
            return Vec::new();
        }

        warn!("Shutdown timeout reached; cancelling remaining runs");
        in_flight.abort_all();
        drain(&mut in_flight).await;

        let cancelled = self.cancel_unfinished().await;
        self.shared.finished.notify_waiters();
        cancelled
    }

    async fn cancel_unfinished(&self) -> Vec<String> {
        let mut runs = self.shared.runs.write().await;
        let mut cancelled = Vec::new();

        for (run_id, entry) in runs.iter_mut() {
            if !entry.run.status.is_active() {
                continue;
            }
            match entry.context.take() {
                Some(ctx) => {
                    ctx.settle_unfinished("run cancelled").await;
                    entry.run.tasks = ctx.snapshot().await;
                }
                None => {
                    for task in entry
                        .run
                        .tasks
                        .iter_mut()
                        .filter(|t| !t.status.is_terminal())
                    {
                        task.mark_completed(TaskStatus::Skipped, None);
                    }
                }
            }
            entry
                .run
                .finish(RunStatus::Cancelled, Some("cancelled during shutdown".to_string()));
            warn!("Cancelled run {} of workflow {}", run_id, entry.run.workflow_id);
            cancelled.push(run_id.clone());
        }
        cancelled
    }
}

async fn drain(set: &mut JoinSet<()>) {
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!("Run processing panicked: {}", e);
            }
        }
    }
}

/// Execute one run from pending to a terminal status.
#[instrument(skip(shared, workflow), fields(workflow_id = %workflow.workflow_id))]
async fn process_run(shared: Arc<Shared>, run_id: String, workflow: Arc<Workflow>) {
    let _slot = match Arc::clone(&shared.run_slots).acquire_owned().await {
        Ok(slot) => slot,
        Err(_) => {
            finalize(&shared, &run_id, RunStatus::Cancelled, Some("run slots closed".to_string())).await;
            return;
        }
    };

    let ctx = {
        let mut runs = shared.runs.write().await;
        let Some(entry) = runs.get_mut(&run_id) else {
            return;
        };
        let ctx = Arc::new(RunContext::new(run_id.clone(), &workflow, &entry.run.params));
        entry.run.mark_running();
        entry.context = Some(Arc::clone(&ctx));
        ctx
    };

    info!("Run {} started ({} tasks)", run_id, workflow.tasks.len());

    if let Err(e) = execute_graph(&shared.dispatcher, &workflow, &ctx).await {
        ctx.abort(e.to_string()).await;
    }
    ctx.settle_unfinished("task did not finish").await;

    let tasks = ctx.snapshot().await;
    {
        let mut runs = shared.runs.write().await;
        if let Some(entry) = runs.get_mut(&run_id) {
            entry.run.tasks = tasks;
            entry.context = None;
        }
    }

    if ctx.is_aborted() {
        let error = ctx.first_error().await;
        finalize(&shared, &run_id, RunStatus::Failed, error).await;
    } else {
        finalize(&shared, &run_id, RunStatus::Success, None).await;
    }
}

async fn finalize(shared: &Shared, run_id: &str, status: RunStatus, error: Option<String>) {
    {
        let mut runs = shared.runs.write().await;
        if let Some(entry) = runs.get_mut(run_id) {
            entry.run.finish(status, error);
            let summary = entry.run.summary();
            match entry.run.status {
                RunStatus::Success => info!(
                    "Run {} of {} succeeded ({} tasks)",
                    run_id, entry.run.workflow_id, summary.total_tasks
                ),
                _ => warn!(
                    "Run {} of {} finished as {}: {} failed, {} skipped; {}",
                    run_id,
                    entry.run.workflow_id,
                    entry.run.status,
                    summary.failed,
                    summary.skipped,
                    entry.run.error.as_deref().unwrap_or("no error recorded")
                ),
            }
        }
    }
    shared.finished.notify_waiters();
}

/// Launch one unit per task; each unit waits on its dependencies' signals.
///
/// Once any task fails no further task starts. Tasks already executing are
/// left to finish, and tasks that never start are recorded as skipped.
async fn execute_graph(
    dispatcher: &Arc<TaskDispatcher>,
    workflow: &Workflow,
    ctx: &Arc<RunContext>,
) -> Result<()> {
    let graph = DependencyGraph::from_workflow(workflow)?;

    let mut senders: HashMap<String, watch::Sender<CompletionSignal>> = HashMap::new();
    let mut receivers: HashMap<String, watch::Receiver<CompletionSignal>> = HashMap::new();
    for task in &workflow.tasks {
        let (tx, rx) = watch::channel(None);
        senders.insert(task.task_id.clone(), tx);
        receivers.insert(task.task_id.clone(), rx);
    }

    let mut units = JoinSet::new();
    for task_id in graph.topological_order() {
        let task = workflow
            .get_task(&task_id)
            .cloned()
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.clone(),
            })?;
        let done = senders
            .remove(&task_id)
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.clone(),
            })?;
        let dependencies: Vec<watch::Receiver<CompletionSignal>> = graph
            .get_dependencies(&task_id)
            .iter()
            .filter_map(|dep| receivers.get(dep).cloned())
            .collect();

        units.spawn(run_task_unit(
            Arc::clone(dispatcher),
            Arc::clone(ctx),
            task,
            dependencies,
            done,
        ));
    }

    while let Some(joined) = units.join_next().await {
        if let Err(e) = joined {
            error!("Task unit of run {} ended abnormally: {}", ctx.run_id, e);
            ctx.abort(format!("task unit ended abnormally: {}", e)).await;
        }
    }
    Ok(())
}

async fn run_task_unit(
    dispatcher: Arc<TaskDispatcher>,
    ctx: Arc<RunContext>,
    task: TaskConfig,
    mut dependencies: Vec<watch::Receiver<CompletionSignal>>,
    done: watch::Sender<CompletionSignal>,
) {
    let task_id = task.task_id.clone();

    let mut dependencies_ok = true;
    for rx in dependencies.iter_mut() {
        let succeeded = rx
            .wait_for(|signal| signal.is_some())
            .await
            .map(|signal| *signal == Some(true))
            .unwrap_or(false);
        dependencies_ok &= succeeded;
    }

    if !dependencies_ok || ctx.is_aborted() {
        debug!("Skipping task {} in run {}", task_id, ctx.run_id);
        ctx.complete(&task_id, TaskStatus::Skipped, None, None).await;
        done.send_replace(Some(false));
        return;
    }

    let permit = match dispatcher.acquire().await {
        Ok(permit) => {
            let stats = dispatcher.get_resource_stats();
            debug!(
                "Task {} acquired a slot ({}/{} in use)",
                task_id, stats.active_tasks, stats.max_concurrent
            );
            permit
        }
        Err(e) => {
            ctx.complete(&task_id, TaskStatus::Skipped, None, None).await;
            ctx.abort(e.to_string()).await;
            done.send_replace(Some(false));
            return;
        }
    };

    // A sibling may have failed while this task waited for a slot
    if ctx.is_aborted() {
        drop(permit);
        ctx.complete(&task_id, TaskStatus::Skipped, None, None).await;
        done.send_replace(Some(false));
        return;
    }

    ctx.mark_started(&task_id).await;
    let outcome = dispatcher.execute_with_retry(&task, &ctx).await;

    // The slot is held until the task's end time is recorded.
    let succeeded = match outcome.result {
        Ok(output) => {
            ctx.complete(&task_id, TaskStatus::Success, Some(output), None)
                .await;
            true
        }
        Err(e) => {
            let message = e.to_string();
            ctx.complete(&task_id, TaskStatus::Failed, None, Some(message.clone()))
                .await;
            ctx.abort(message).await;
            false
        }
    };
    drop(permit);
    done.send_replace(Some(succeeded));
}
