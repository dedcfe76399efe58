// ABOUTME: Scheduling module turning cron expressions into workflow triggers
// ABOUTME: Exports the WorkflowScheduler that owns per-workflow timers

pub mod workflow_scheduler;

pub use workflow_scheduler::WorkflowScheduler;
