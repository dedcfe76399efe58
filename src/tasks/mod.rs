// ABOUTME: Task kind implementations and the executor that dispatches on kind
// ABOUTME: Contains script, process and HTTP tasks plus timeout and secret handling

pub mod http;
pub mod process;
pub mod script;
pub mod secrets;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::engine::error::{ExecutionError, Result};
use crate::parser::{RunParams, TaskConfig};
use secrets::SecretsProvider;

/// Structured result of one successful task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskOutput {
    Process {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Http {
        status: u16,
        headers: BTreeMap<String, String>,
        body: String,
    },
}

impl TaskOutput {
    /// Main textual payload: stdout for processes, the body for HTTP.
    pub fn text(&self) -> &str {
        match self {
            TaskOutput::Process { stdout, .. } => stdout,
            TaskOutput::Http { body, .. } => body,
        }
    }
}

#[async_trait]
pub trait TaskImplementation: Send + Sync {
    /// Run one attempt of `task`. `params` are the effective params for this
    /// task, already merged, and secrets in `task.config` are already resolved.
    async fn execute(&self, task: &TaskConfig, params: &RunParams) -> Result<TaskOutput>;

    fn task_type(&self) -> &'static str;
    fn validate_config(&self, config: &serde_yaml::Value) -> Result<()>;

    /// Short description of what a config does, for logs. Called with the
    /// unresolved config so secret values never reach the log.
    fn describe(&self, _config: &serde_yaml::Value) -> Option<String> {
        None
    }
}

pub struct TaskRegistry {
    implementations: HashMap<String, Box<dyn TaskImplementation>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Box::new(script::ScriptTask));
        registry.register(Box::new(process::ProcessTask));
        registry.register(Box::new(http::HttpTask::new()));

        registry
    }

    /// A registry with no kinds registered.
    pub fn empty() -> Self {
        Self {
            implementations: HashMap::new(),
        }
    }

    pub fn register(&mut self, implementation: Box<dyn TaskImplementation>) {
        let task_type = implementation.task_type().to_string();
        self.implementations.insert(task_type, implementation);
    }

    pub fn get_implementation(&self, task_type: &str) -> Option<&dyn TaskImplementation> {
        self.implementations.get(task_type).map(|imp| imp.as_ref())
    }

    pub fn validate_task_config(&self, task_type: &str, config: &serde_yaml::Value) -> Result<()> {
        match self.get_implementation(task_type) {
            Some(implementation) => implementation.validate_config(config),
            None => Err(ExecutionError::UnsupportedKind {
                task_id: "validation".to_string(),
                kind: task_type.to_string(),
            }),
        }
    }

    pub fn list_supported_tasks(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.implementations.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a single task attempt according to its kind.
///
/// Resolves secret placeholders, layers the task's own params over the run
/// params, and bounds the attempt by the task's timeout. Dropping the attempt
/// on timeout kills any child process it spawned. Secret values are masked in
/// the errors it returns.
pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
    secrets: Arc<dyn SecretsProvider>,
}

impl TaskExecutor {
    pub fn new(registry: Arc<TaskRegistry>, secrets: Arc<dyn SecretsProvider>) -> Self {
        Self { registry, secrets }
    }

    #[instrument(skip_all, fields(task_id = %task.task_id, kind = %task.kind))]
    pub async fn execute(&self, task: &TaskConfig, params: &RunParams) -> Result<TaskOutput> {
        let implementation = self
            .registry
            .get_implementation(task.kind.as_str())
            .ok_or_else(|| ExecutionError::UnsupportedKind {
                task_id: task.task_id.clone(),
                kind: task.kind.to_string(),
            })?;

        let config = secrets::resolve_placeholders(&task.config, self.secrets.as_ref())
            .map_err(|key| ExecutionError::ConfigError {
                task_id: task.task_id.clone(),
                message: format!("unresolved secret '{}'", key),
            })?;

        let secret_values = secrets::referenced_values(&task.config, self.secrets.as_ref());

        let mut resolved = task.clone();
        resolved.config = config;

        let mut effective = params.clone();
        effective.extend(task.params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let bound = task.timeout();
        match implementation.describe(&task.config) {
            Some(description) => info!(
                "Executing {} task: {} - {}",
                task.kind, task.task_id, description
            ),
            None => info!("Executing {} task: {}", task.kind, task.task_id),
        }
        debug!("Executing with timeout {:?}", bound);

        match timeout(bound, implementation.execute(&resolved, &effective)).await {
            Ok(result) => result.map_err(|e| redact_error(e, &secret_values)),
            Err(_) => {
                warn!("Task {} timed out after {:?}", task.task_id, bound);
                Err(ExecutionError::TaskTimeout {
                    task_id: task.task_id.clone(),
                    timeout: bound,
                })
            }
        }
    }
}

fn redact_error(error: ExecutionError, secret_values: &[String]) -> ExecutionError {
    if secret_values.is_empty() {
        return error;
    }
    let scrub = |text: String| secrets::redact(&text, secret_values);
    match error {
        ExecutionError::TaskFailed {
            task_id,
            message,
            exit_code,
            stderr,
        } => ExecutionError::TaskFailed {
            task_id,
            message: scrub(message),
            exit_code,
            stderr: stderr.map(scrub),
        },
        ExecutionError::HttpFailed {
            task_id,
            status,
            message,
        } => ExecutionError::HttpFailed {
            task_id,
            status,
            message: scrub(message),
        },
        ExecutionError::ConfigError { task_id, message } => ExecutionError::ConfigError {
            task_id,
            message: scrub(message),
        },
        other => other,
    }
}

/// Render a param value for places that only take text (env vars, query strings).
pub(crate) fn param_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn config_error(task_id: &str, kind: &str, error: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::ConfigError {
        task_id: task_id.to_string(),
        message: format!("Invalid {} configuration: {}", kind, error),
    }
}
