// ABOUTME: Main library module for the cadence workflow orchestrator
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod parser;
pub mod runtime;
pub mod scheduler;
pub mod tasks;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{ExecutionCoordinator, Run, RunStatus, TaskStatus};
pub use parser::{DefinitionLoader, TaskConfig, Workflow, WorkflowParser, WorkflowValidator};
pub use runtime::{Runtime, RuntimeSettings};
pub use scheduler::WorkflowScheduler;

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
