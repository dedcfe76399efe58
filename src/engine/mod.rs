// ABOUTME: Run execution engine for the cadence workflow orchestrator
// ABOUTME: Handles run coordination, dependency resolution and bounded task dispatch

pub mod context;
pub mod coordinator;
pub mod dependency;
pub mod dispatch;
pub mod error;
pub mod result;

pub use context::RunContext;
pub use coordinator::{CoordinatorConfig, ExecutionCoordinator};
pub use dependency::DependencyGraph;
pub use dispatch::{DispatchOutcome, ResourceStats, TaskDispatcher};
pub use error::{ExecutionError, Result};
pub use result::{Run, RunStatus, RunSummary, RunTrigger, TaskRun, TaskStatus};
