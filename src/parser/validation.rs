// ABOUTME: Workflow validation logic and dependency checking
// ABOUTME: Checks identity, schedule, task graph shape and per-kind task configuration

use chrono::Utc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::cron::CronSchedule;
use super::error::ValidationError;
use super::task::TaskKind;
use super::workflow::Workflow;
use crate::tasks::TaskRegistry;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

#[derive(Clone, Default)]
pub struct WorkflowValidator {
    task_registry: Option<Arc<TaskRegistry>>,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self {
            task_registry: None,
        }
    }

    /// Check kinds and task configs against the registered implementations.
    pub fn with_task_registry(mut self, task_registry: Arc<TaskRegistry>) -> Self {
        self.task_registry = Some(task_registry);
        self
    }

    /// Validate a complete workflow
    pub fn validate(&self, workflow: &Workflow) -> ValidationReport {
        let mut report = ValidationReport::new();

        self.validate_identity(workflow, &mut report);
        self.validate_schedule(workflow, &mut report);
        self.validate_window(workflow, &mut report);

        if workflow.tasks.is_empty() {
            report.errors.push(ValidationError::EmptyWorkflow);
        } else {
            self.validate_task_ids(workflow, &mut report);
            self.validate_dependencies(workflow, &mut report);
            self.validate_task_configs(workflow, &mut report);
        }

        report.is_valid = report.errors.is_empty();
        report
    }

    fn validate_identity(&self, workflow: &Workflow, report: &mut ValidationReport) {
        if workflow.workflow_id.trim().is_empty() {
            report.errors.push(ValidationError::MissingWorkflowId);
        }
    }

    fn validate_schedule(&self, workflow: &Workflow, report: &mut ValidationReport) {
        if let Some(ref expression) = workflow.schedule {
            if let Err(e) = CronSchedule::parse(expression) {
                report.errors.push(ValidationError::InvalidSchedule {
                    expression: expression.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if workflow.catchup {
            report.warnings.push(
                "catchup is not performed: ticks missed while the scheduler is down are skipped"
                    .to_string(),
            );
        }
    }

    fn validate_window(&self, workflow: &Workflow, report: &mut ValidationReport) {
        if let (Some(start), Some(end)) = (workflow.start_date, workflow.end_date) {
            if start > end {
                report.errors.push(ValidationError::InvalidWorkflowConfig {
                    reason: format!("startDate {} is after endDate {}", start, end),
                });
            }
        }

        if let Some(end) = workflow.end_date {
            if end < Utc::now() {
                report
                    .warnings
                    .push(format!("endDate {} is in the past; no runs will fire", end));
            }
        }

        if workflow.max_active_runs == Some(0) {
            report.errors.push(ValidationError::InvalidWorkflowConfig {
                reason: "maxActiveRuns must be greater than 0".to_string(),
            });
        }
    }

    fn validate_task_ids(&self, workflow: &Workflow, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for (position, task) in workflow.tasks.iter().enumerate() {
            if task.task_id.trim().is_empty() {
                report
                    .errors
                    .push(ValidationError::MissingTaskId { position });
            } else if !seen.insert(task.task_id.as_str()) {
                report.errors.push(ValidationError::DuplicateTask {
                    task: task.task_id.clone(),
                });
            }
        }
    }

    /// Validate task dependencies and detect cycles
    fn validate_dependencies(&self, workflow: &Workflow, report: &mut ValidationReport) {
        let task_ids: HashSet<&str> = workflow.tasks.iter().map(|t| t.task_id.as_str()).collect();

        for task in &workflow.tasks {
            let mut declared = HashSet::new();
            for dep in &task.depends_on {
                if !task_ids.contains(dep.as_str()) {
                    report.errors.push(ValidationError::UnknownDependency {
                        task: task.task_id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if !declared.insert(dep.as_str()) {
                    report.warnings.push(format!(
                        "Task '{}' lists dependency '{}' more than once",
                        task.task_id, dep
                    ));
                }
            }
        }

        if let Err(cycle) = detect_cycles(workflow) {
            report
                .errors
                .push(ValidationError::CircularDependency { tasks: cycle });
        }
    }

    fn validate_task_configs(&self, workflow: &Workflow, report: &mut ValidationReport) {
        for task in &workflow.tasks {
            if task.timeout_ms == Some(0) {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: task.task_id.clone(),
                    reason: "timeoutMs must be greater than 0".to_string(),
                });
            }

            match self.task_registry {
                Some(ref registry) => {
                    let kind = task.kind.as_str();
                    if registry.get_implementation(kind).is_none() {
                        report.errors.push(ValidationError::UnsupportedTaskKind {
                            task: task.task_id.clone(),
                            kind: kind.to_string(),
                            supported_kinds: registry
                                .list_supported_tasks()
                                .into_iter()
                                .map(str::to_string)
                                .collect(),
                        });
                    } else if let Err(e) = registry.validate_task_config(kind, &task.config) {
                        report.errors.push(ValidationError::InvalidTaskConfig {
                            task: task.task_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                None => {
                    if let TaskKind::Other(ref kind) = task.kind {
                        report.errors.push(ValidationError::UnsupportedTaskKind {
                            task: task.task_id.clone(),
                            kind: kind.clone(),
                            supported_kinds: ["script", "process", "http"]
                                .iter()
                                .map(|s| s.to_string())
                                .collect(),
                        });
                    }
                }
            }
        }
    }
}

/// Report the tasks taking part in a dependency cycle, if any.
fn detect_cycles(workflow: &Workflow) -> std::result::Result<(), Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut node_map: HashMap<&str, NodeIndex> = HashMap::new();

    for task in &workflow.tasks {
        node_map
            .entry(task.task_id.as_str())
            .or_insert_with(|| graph.add_node(task.task_id.as_str()));
    }

    for task in &workflow.tasks {
        let task_node = node_map[task.task_id.as_str()];
        for dep in &task.depends_on {
            if let Some(&dep_node) = node_map.get(dep.as_str()) {
                graph.update_edge(dep_node, task_node, ());
            }
        }
    }

    if petgraph::algo::toposort(&graph, None).is_ok() {
        return Ok(());
    }

    let mut cycle_tasks: Vec<String> = petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph.contains_edge(component[0], component[0])
        })
        .flatten()
        .map(|node| graph[node].to_string())
        .collect();
    cycle_tasks.sort();
    Err(cycle_tasks)
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// All errors joined into one line, for logs and CLI output.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
