// ABOUTME: Core workflow data structures and definition-file parsing
// ABOUTME: Defines the Workflow struct and turns YAML documents into workflow declarations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ParserError, Result};
use super::task::{RunParams, TaskConfig};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default, alias = "id", alias = "workflow_id")]
    pub workflow_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default, alias = "start_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "end_date")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub catchup: bool,
    #[serde(default, alias = "max_active_runs")]
    pub max_active_runs: Option<usize>,
    #[serde(default, alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub params: RunParams,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            description: None,
            schedule: None,
            start_date: None,
            end_date: None,
            catchup: false,
            max_active_runs: None,
            timeout_ms: None,
            retries: None,
            owner: None,
            tags: Vec::new(),
            params: RunParams::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.tasks.push(task);
        self
    }

    /// Parse a single workflow from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut workflow: Workflow =
            serde_yaml::from_str(content).map_err(ParserError::YamlError)?;
        workflow.apply_task_defaults();
        Ok(workflow)
    }

    /// Push workflow-level timeout/retry defaults down to tasks that declare none.
    pub fn apply_task_defaults(&mut self) {
        for task in &mut self.tasks {
            if task.timeout_ms.is_none() {
                task.timeout_ms = self.timeout_ms;
            }
            if task.retries.is_none() {
                task.retries = self.retries;
            }
        }
    }

    /// Get all task IDs in declaration order
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.task_id.clone()).collect()
    }

    /// Get task configuration by ID
    pub fn get_task(&self, task_id: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Check if a task exists in the workflow
    pub fn has_task(&self, task_id: &str) -> bool {
        self.get_task(task_id).is_some()
    }

    /// Get all tasks that directly depend on a specific task
    pub fn get_dependent_tasks(&self, task_id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| task.depends_on.iter().any(|dep| dep == task_id))
            .map(|task| task.task_id.clone())
            .collect()
    }

    /// Whether the validity window admits a run at `now`
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date.map_or(true, |start| now >= start)
            && self.end_date.map_or(true, |end| now <= end)
    }
}

/// One workflow declaration pulled out of a definition file, not yet converted.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Best-effort id for diagnostics, read before conversion.
    pub workflow_id: Option<String>,
    pub value: serde_yaml::Value,
}

impl Declaration {
    pub fn label(&self) -> &str {
        self.workflow_id.as_deref().unwrap_or("<unnamed>")
    }

    pub fn into_workflow(self) -> Result<Workflow> {
        let mut workflow: Workflow =
            serde_yaml::from_value(self.value).map_err(ParserError::YamlError)?;
        workflow.apply_task_defaults();
        Ok(workflow)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Declaration>> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(ParserError::IoError)?;
        self.parse_string(&content)
    }

    /// Split a definition file into its workflow declarations.
    ///
    /// A file holds one or more YAML documents. Each document is either a
    /// single workflow mapping or a mapping with a `workflows:` sequence.
    /// Structural problems (bad YAML, wrong shape) fail the whole file;
    /// problems inside a declaration are left for `Declaration::into_workflow`.
    pub fn parse_string(&self, content: &str) -> Result<Vec<Declaration>> {
        let mut declarations = Vec::new();

        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)?;

            match value {
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::Mapping(ref mapping) => {
                    if let Some(list) = mapping.get("workflows") {
                        let items = list.as_sequence().ok_or_else(|| {
                            ParserError::InvalidFormat("'workflows' must be a list".to_string())
                        })?;
                        declarations.extend(items.iter().cloned().map(Self::declaration));
                    } else {
                        declarations.push(Self::declaration(value));
                    }
                }
                _ => {
                    return Err(ParserError::InvalidFormat(
                        "each document must be a workflow mapping".to_string(),
                    ))
                }
            }
        }

        Ok(declarations)
    }

    fn declaration(value: serde_yaml::Value) -> Declaration {
        let workflow_id = ["workflowId", "id", "workflow_id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string);
        Declaration { workflow_id, value }
    }
}
