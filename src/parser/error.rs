// ABOUTME: Error types for workflow definition parsing and validation
// ABOUTME: Defines specific error types for parser and loader operations

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read definition file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid definition format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Definitions directory unavailable: {path}: {reason}")]
    DefinitionsDir { path: PathBuf, reason: String },

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Workflow is missing a workflowId")]
    MissingWorkflowId,

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Circular dependency detected in tasks: {tasks:?}")]
    CircularDependency { tasks: Vec<String> },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Invalid task configuration for '{task}': {reason}")]
    InvalidTaskConfig { task: String, reason: String },

    #[error("Invalid workflow configuration: {reason}")]
    InvalidWorkflowConfig { reason: String },

    #[error("Duplicate task id: {task}")]
    DuplicateTask { task: String },

    #[error("Task with empty taskId at position {position}")]
    MissingTaskId { position: usize },

    #[error("Empty workflow: no tasks defined")]
    EmptyWorkflow,

    #[error("Unsupported task kind '{kind}' in task '{task}'. Supported kinds: {supported_kinds:?}")]
    UnsupportedTaskKind {
        task: String,
        kind: String,
        supported_kinds: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, ParserError>;
