// ABOUTME: Cron-driven scheduler mapping each scheduled workflow to one timer task
// ABOUTME: Fires runs on schedule or on demand after checking the workflow's validity window

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::engine::{ExecutionCoordinator, ExecutionError, Result, RunTrigger};
use crate::parser::{CronSchedule, DefinitionLoader, LoadReport, RunParams, ValidationError, Workflow};

struct ScheduledJob {
    schedule: CronSchedule,
    handle: JoinHandle<()>,
}

/// Owns the mapping from workflow id to its active timer.
///
/// Cloning is cheap and every clone shares the same timers.
#[derive(Clone)]
pub struct WorkflowScheduler {
    loader: Arc<DefinitionLoader>,
    coordinator: Arc<ExecutionCoordinator>,
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
}

impl WorkflowScheduler {
    pub fn new(loader: Arc<DefinitionLoader>, coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self {
            loader,
            coordinator,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load every definition and schedule the workflows that declare a schedule.
    ///
    /// Fails only when the definitions directory cannot be acquired.
    pub async fn start(&self) -> Result<LoadReport> {
        let report = self.loader.load_all().await?;
        let scheduled = self.schedule_all().await;
        info!("Scheduler started with {} scheduled workflow(s)", scheduled);
        Ok(report)
    }

    /// Schedule every registered workflow. Returns how many got a timer.
    pub async fn schedule_all(&self) -> usize {
        let mut scheduled = 0;
        for workflow in self.loader.get_all().await {
            match self.schedule(&workflow).await {
                Ok(true) => scheduled += 1,
                Ok(false) => {}
                Err(e) => warn!("Could not schedule {}: {}", workflow.workflow_id, e),
            }
        }
        scheduled
    }

    /// Install the timer for a workflow, replacing any existing one.
    ///
    /// A workflow without a schedule ends up unscheduled. Returns whether a
    /// timer is now active.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.workflow_id))]
    pub async fn schedule(&self, workflow: &Workflow) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;

        if let Some(previous) = jobs.remove(&workflow.workflow_id) {
            previous.handle.abort();
            debug!("Replaced timer for {}", workflow.workflow_id);
        }

        let Some(ref expression) = workflow.schedule else {
            debug!("{} has no schedule; trigger-only", workflow.workflow_id);
            return Ok(false);
        };

        let schedule = CronSchedule::parse(expression).map_err(|e| {
            ExecutionError::Validation(ValidationError::InvalidSchedule {
                expression: expression.clone(),
                reason: e.to_string(),
            })
        })?;

        let handle = tokio::spawn(timer_loop(
            Arc::clone(&self.loader),
            Arc::clone(&self.coordinator),
            workflow.workflow_id.clone(),
            schedule.clone(),
        ));

        info!(
            "Scheduled {} with '{}' (next fire {})",
            workflow.workflow_id,
            schedule.expression(),
            schedule
                .next_after(Utc::now())
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        jobs.insert(workflow.workflow_id.clone(), ScheduledJob { schedule, handle });
        Ok(true)
    }

    /// Cancel a workflow's timer. Returns whether one was active.
    pub async fn unschedule(&self, workflow_id: &str) -> bool {
        match self.jobs.lock().await.remove(workflow_id) {
            Some(job) => {
                job.handle.abort();
                info!("Unscheduled {}", workflow_id);
                true
            }
            None => false,
        }
    }

    /// Start a run on demand, subject to the workflow's validity window.
    pub async fn trigger(&self, workflow_id: &str, params: RunParams) -> Result<String> {
        trigger_run(
            &self.loader,
            &self.coordinator,
            workflow_id,
            params,
            RunTrigger::Manual,
        )
        .await
    }

    /// Cancel every timer.
    pub async fn stop(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
        info!("Scheduler stopped");
    }

    pub async fn list_scheduled(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_scheduled(&self, workflow_id: &str) -> bool {
        self.jobs.lock().await.contains_key(workflow_id)
    }

    /// When the workflow's timer fires next, if it is scheduled.
    pub async fn next_fire_time(&self, workflow_id: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .await
            .get(workflow_id)
            .and_then(|job| job.schedule.next_after(Utc::now()))
    }
}

async fn trigger_run(
    loader: &DefinitionLoader,
    coordinator: &ExecutionCoordinator,
    workflow_id: &str,
    params: RunParams,
    trigger: RunTrigger,
) -> Result<String> {
    let workflow = loader
        .get(workflow_id)
        .await
        .ok_or_else(|| ExecutionError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })?;

    let now = Utc::now();
    if !workflow.is_within_window(now) {
        let reason = match (workflow.start_date, workflow.end_date) {
            (Some(start), _) if now < start => {
                format!("not eligible before startDate {}", start.to_rfc3339())
            }
            (_, Some(end)) => format!("not eligible after endDate {}", end.to_rfc3339()),
            _ => "outside the eligibility window".to_string(),
        };
        return Err(ExecutionError::ConstraintViolation {
            workflow_id: workflow_id.to_string(),
            reason,
        });
    }

    coordinator.start_run(workflow_id, params, trigger).await
}

/// Sleep until each fire time and trigger a run. Trigger failures are logged
/// and never end the loop.
async fn timer_loop(
    loader: Arc<DefinitionLoader>,
    coordinator: Arc<ExecutionCoordinator>,
    workflow_id: String,
    schedule: CronSchedule,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_after(from) else {
            warn!(
                "Schedule '{}' of {} never fires again; timer stopped",
                schedule.expression(),
                workflow_id
            );
            return;
        };

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!("{} sleeping {:?} until {}", workflow_id, wait, next);
        tokio::time::sleep(wait).await;
        last_fire = Some(next);

        debug!("Timer fired for {}", workflow_id);
        match trigger_run(
            &loader,
            &coordinator,
            &workflow_id,
            RunParams::new(),
            RunTrigger::Schedule,
        )
        .await
        {
            Ok(run_id) => info!("Scheduled run {} of {} started", run_id, workflow_id),
            Err(e) => warn!("Scheduled trigger of {} failed: {}", workflow_id, e),
        }
    }
}
