// ABOUTME: Task definition structures and kind-specific defaults
// ABOUTME: Defines TaskConfig, the TaskKind discriminator and run parameter types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Parameters handed to a run by its trigger and merged into every task's input.
pub type RunParams = HashMap<String, serde_json::Value>;

/// Default bound for script and process tasks (5 minutes).
pub const DEFAULT_PROCESS_TIMEOUT_MS: u64 = 300_000;

/// Default bound for HTTP tasks (30 seconds).
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default, alias = "id", alias = "task_id")]
    pub task_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "type")]
    pub kind: TaskKind,
    #[serde(default, alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default, alias = "depends_on")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub params: RunParams,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

/// Task kind as declared in a definition. Unknown kinds are kept verbatim so
/// that validation can report them instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    Script,
    Process,
    Http,
    Other(String),
}

impl TaskConfig {
    pub fn new(task_id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            task_id: task_id.into(),
            description: None,
            kind,
            timeout_ms: None,
            retries: None,
            depends_on: Vec::new(),
            params: RunParams::new(),
            config: serde_yaml::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_yaml::Value) -> Self {
        self.config = config;
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Execution bound: the declared timeout or the kind's default.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            self.timeout_ms
                .unwrap_or_else(|| self.kind.default_timeout_ms()),
        )
    }

    /// Number of extra attempts after the first one.
    pub fn retry_count(&self) -> u32 {
        self.retries.unwrap_or(0)
    }

    /// Total attempts the dispatcher makes before surfacing a failure.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count().saturating_add(1)
    }
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::Script => "script",
            TaskKind::Process => "process",
            TaskKind::Http => "http",
            TaskKind::Other(kind) => kind,
        }
    }

    pub fn default_timeout_ms(&self) -> u64 {
        match self {
            TaskKind::Http => DEFAULT_HTTP_TIMEOUT_MS,
            _ => DEFAULT_PROCESS_TIMEOUT_MS,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, TaskKind::Other(_))
    }
}

impl From<String> for TaskKind {
    fn from(kind: String) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "script" | "javascript" => TaskKind::Script,
            "process" | "shell" | "command" => TaskKind::Process,
            "http" => TaskKind::Http,
            _ => TaskKind::Other(kind),
        }
    }
}

impl From<&str> for TaskKind {
    fn from(kind: &str) -> Self {
        TaskKind::from(kind.to_string())
    }
}

impl From<TaskKind> for String {
    fn from(kind: TaskKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
