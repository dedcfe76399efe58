// ABOUTME: Error types for run coordination and task execution
// ABOUTME: Covers lookups, trigger constraints, task failures, timeouts and unsupported kinds

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Constraint violation for workflow {workflow_id}: {reason}")]
    ConstraintViolation { workflow_id: String, reason: String },

    #[error("Task execution failed: {task_id} - {message}")]
    TaskFailed {
        task_id: String,
        message: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("HTTP task failed: {task_id} - {message}")]
    HttpFailed {
        task_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Task timeout: {task_id} - exceeded {timeout:?}")]
    TaskTimeout { task_id: String, timeout: Duration },

    #[error("Unsupported task kind '{kind}' for task {task_id}")]
    UnsupportedKind { task_id: String, kind: String },

    #[error("Configuration error for task {task_id}: {message}")]
    ConfigError { task_id: String, message: String },

    #[error("Coordinator is shutting down; no new runs are accepted")]
    ShuttingDown,

    #[error("Validation error: {0}")]
    Validation(#[from] crate::parser::ValidationError),

    #[error("Parser error: {0}")]
    ParserError(#[from] crate::parser::ParserError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl ExecutionError {
    /// Configuration mistakes fail fast; everything else may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ExecutionError::UnsupportedKind { .. }
                | ExecutionError::ConfigError { .. }
                | ExecutionError::Validation(_)
                | ExecutionError::ShuttingDown
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ExecutionError::WorkflowNotFound { .. }
                | ExecutionError::RunNotFound { .. }
                | ExecutionError::TaskNotFound { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::TaskTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        let unsupported = ExecutionError::UnsupportedKind {
            task_id: "t".to_string(),
            kind: "ftp".to_string(),
        };
        assert!(!unsupported.is_retryable());

        let failed = ExecutionError::TaskFailed {
            task_id: "t".to_string(),
            message: "exit 1".to_string(),
            exit_code: Some(1),
            stderr: None,
        };
        assert!(failed.is_retryable());

        let timeout = ExecutionError::TaskTimeout {
            task_id: "t".to_string(),
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.is_timeout());
    }
}
