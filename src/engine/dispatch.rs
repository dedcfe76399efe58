// ABOUTME: Task dispatch with a global concurrency ceiling and retry handling
// ABOUTME: Bounds concurrent task executions across all runs and retries failed attempts

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use super::context::RunContext;
use super::error::{ExecutionError, Result};
use crate::parser::TaskConfig;
use crate::tasks::{TaskExecutor, TaskOutput};

pub struct TaskDispatcher {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    executor: Arc<TaskExecutor>,
}

/// Outcome of dispatching one task, including every attempt made.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub result: Result<TaskOutput>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub active_tasks: usize,
}

impl TaskDispatcher {
    /// Create a dispatcher that runs at most `max_concurrent` tasks at once
    pub fn new(executor: Arc<TaskExecutor>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            executor,
        }
    }

    /// Wait for an execution slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::ShuttingDown)
    }

    /// Execute a task, retrying up to its declared retry count with no delay
    /// between attempts. Non-retryable errors end the loop immediately.
    ///
    /// The caller holds an execution slot for the whole loop.
    pub async fn execute_with_retry(&self, task: &TaskConfig, ctx: &RunContext) -> DispatchOutcome {
        let max_attempts = task.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.record_attempt(&task.task_id, attempt).await;

            info!(
                "Executing task {} (attempt {}/{})",
                task.task_id, attempt, max_attempts
            );

            match self.executor.execute(task, ctx.params()).await {
                Ok(output) => {
                    debug!("Task {} succeeded on attempt {}", task.task_id, attempt);
                    return DispatchOutcome {
                        result: Ok(output),
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Task {} failed on attempt {}: {}; retrying",
                        task.task_id, attempt, e
                    );
                }
                Err(e) => {
                    error!(
                        "Task {} failed after {} attempt(s): {}",
                        task.task_id, attempt, e
                    );
                    return DispatchOutcome {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }

    /// Get current resource usage statistics
    pub fn get_resource_stats(&self) -> ResourceStats {
        let available_permits = self.semaphore.available_permits();
        ResourceStats {
            max_concurrent: self.max_concurrent,
            available_permits,
            active_tasks: self.max_concurrent.saturating_sub(available_permits),
        }
    }
}
