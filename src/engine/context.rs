// ABOUTME: Per-run execution context and task-run state tracking
// ABOUTME: Owns one run's TaskRun map, its effective params and the soft-stop flag

use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::result::{TaskRun, TaskStatus};
use crate::parser::{RunParams, Workflow};
use crate::tasks::TaskOutput;

/// State shared by the task units of a single run.
///
/// Each run gets its own context, so task completions of one run never
/// contend with another run's bookkeeping.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub workflow_id: String,
    params: RunParams,
    task_runs: RwLock<IndexMap<String, TaskRun>>,
    aborted: AtomicBool,
    first_error: RwLock<Option<String>>,
}

impl RunContext {
    /// Build a context with one pending TaskRun per task, in declaration order.
    /// Trigger params are layered over the workflow's default params.
    pub fn new(run_id: impl Into<String>, workflow: &Workflow, trigger_params: &RunParams) -> Self {
        let mut params = workflow.params.clone();
        params.extend(trigger_params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let task_runs = workflow
            .tasks
            .iter()
            .map(|task| {
                (
                    task.task_id.clone(),
                    TaskRun::new(task.task_id.clone(), task.kind.as_str()),
                )
            })
            .collect();

        Self {
            run_id: run_id.into(),
            workflow_id: workflow.workflow_id.clone(),
            params,
            task_runs: RwLock::new(task_runs),
            aborted: AtomicBool::new(false),
            first_error: RwLock::new(None),
        }
    }

    /// Params every task of this run receives before its own params are applied.
    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// Whether a failure has been recorded; no new task may start once set.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Record a failure. Only the first error is kept.
    pub async fn abort(&self, error: String) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut first = self.first_error.write().await;
        if first.is_none() {
            *first = Some(error);
        }
    }

    pub async fn first_error(&self) -> Option<String> {
        self.first_error.read().await.clone()
    }

    pub async fn mark_started(&self, task_id: &str) {
        if let Some(task_run) = self.task_runs.write().await.get_mut(task_id) {
            task_run.mark_started();
        }
    }

    pub async fn record_attempt(&self, task_id: &str, attempt: u32) {
        if let Some(task_run) = self.task_runs.write().await.get_mut(task_id) {
            task_run.attempts = attempt;
        }
    }

    pub async fn complete(
        &self,
        task_id: &str,
        status: TaskStatus,
        output: Option<TaskOutput>,
        error: Option<String>,
    ) {
        if let Some(task_run) = self.task_runs.write().await.get_mut(task_id) {
            task_run.output = output;
            task_run.mark_completed(status, error);
        }
    }

    /// Close out every TaskRun that never reached a terminal status.
    /// Pending tasks become skipped; tasks caught mid-flight fail with `reason`.
    pub async fn settle_unfinished(&self, reason: &str) {
        for task_run in self.task_runs.write().await.values_mut() {
            match task_run.status {
                TaskStatus::Pending => task_run.mark_completed(TaskStatus::Skipped, None),
                TaskStatus::Running => {
                    task_run.mark_completed(TaskStatus::Failed, Some(reason.to_string()))
                }
                _ => {}
            }
        }
    }

    /// Copy of the TaskRuns in declaration order.
    pub async fn snapshot(&self) -> Vec<TaskRun> {
        self.task_runs.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{TaskConfig, TaskKind};
    use serde_json::json;

    fn workflow() -> Workflow {
        let mut workflow = Workflow::new("ctx")
            .with_task(TaskConfig::new("a", TaskKind::Script))
            .with_task(TaskConfig::new("b", TaskKind::Http).depends_on(["a"]));
        workflow.params.insert("env".to_string(), json!("dev"));
        workflow.params.insert("region".to_string(), json!("eu"));
        workflow
    }

    #[tokio::test]
    async fn test_trigger_params_override_workflow_params() {
        let mut trigger = RunParams::new();
        trigger.insert("env".to_string(), json!("prod"));

        let ctx = RunContext::new("r1", &workflow(), &trigger);
        assert_eq!(ctx.params().get("env"), Some(&json!("prod")));
        assert_eq!(ctx.params().get("region"), Some(&json!("eu")));
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let ctx = RunContext::new("r1", &workflow(), &RunParams::new());
        assert!(!ctx.is_aborted());

        ctx.abort("a failed".to_string()).await;
        ctx.abort("b failed".to_string()).await;

        assert!(ctx.is_aborted());
        assert_eq!(ctx.first_error().await.as_deref(), Some("a failed"));
    }

    #[tokio::test]
    async fn test_settle_unfinished() {
        let ctx = RunContext::new("r1", &workflow(), &RunParams::new());
        ctx.mark_started("a").await;
        ctx.settle_unfinished("cancelled").await;

        let tasks = ctx.snapshot().await;
        assert_eq!(tasks[0].task_id, "a");
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].error.as_deref(), Some("cancelled"));
        assert_eq!(tasks[1].status, TaskStatus::Skipped);
        assert_eq!(tasks[1].kind, "http");
    }
}
