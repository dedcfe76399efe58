// ABOUTME: Parser module for YAML workflow definitions
// ABOUTME: Exports workflow parsing, cron schedules, validation and the definition loader

pub mod cron;
pub mod error;
pub mod loader;
pub mod task;
pub mod validation;
pub mod workflow;

pub use cron::{CronError, CronSchedule};
pub use error::{ParserError, ValidationError};
pub use loader::{is_definition_file, DefinitionLoader, LoadFailure, LoadReport};
pub use task::{RunParams, TaskConfig, TaskKind};
pub use validation::{ValidationReport, WorkflowValidator};
pub use workflow::{Declaration, Workflow, WorkflowParser};
