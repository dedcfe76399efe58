// ABOUTME: Process task implementation for running external commands
// ABOUTME: Spawns a command with params in its environment and captures its output

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{config_error, param_to_string, TaskImplementation, TaskOutput};
use crate::engine::error::{ExecutionError, Result};
use crate::parser::{RunParams, TaskConfig};

pub struct ProcessTask;

/// Configuration for process tasks
///
/// With `args` the command is executed directly. Without `args` the command
/// line is handed to `shell -c`, so pipes and redirects work.
///
/// ```yaml
/// kind: process
/// config:
///   command: pg_dump
///   args: ["--format=custom", "analytics"]
///   env:
///     PGHOST: db.internal
///   workingDir: /var/backups
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied after run params
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, alias = "working_dir")]
    pub working_dir: Option<String>,

    #[serde(default = "default_shell")]
    pub shell: String,
}

pub(crate) fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl ProcessConfig {
    fn parse(task_id: &str, config: &serde_yaml::Value) -> Result<Self> {
        let config: ProcessConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| config_error(task_id, "process", e))?;

        if config.command.trim().is_empty() {
            return Err(config_error(task_id, "process", "command cannot be empty"));
        }
        if config.args.is_empty() && config.shell.trim().is_empty() {
            return Err(config_error(task_id, "process", "shell cannot be empty"));
        }
        Ok(config)
    }
}

#[async_trait]
impl TaskImplementation for ProcessTask {
    async fn execute(&self, task: &TaskConfig, params: &RunParams) -> Result<TaskOutput> {
        let config = ProcessConfig::parse(&task.task_id, &task.config)?;

        let mut cmd = if config.args.is_empty() {
            let mut cmd = Command::new(&config.shell);
            cmd.arg("-c").arg(&config.command);
            cmd
        } else {
            let mut cmd = Command::new(&config.command);
            cmd.args(&config.args);
            cmd
        };

        apply_params_env(&mut cmd, params);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(ref working_dir) = config.working_dir {
            cmd.current_dir(working_dir);
        }

        run_process(&task.task_id, cmd).await
    }

    fn task_type(&self) -> &'static str {
        "process"
    }

    fn validate_config(&self, config: &serde_yaml::Value) -> Result<()> {
        ProcessConfig::parse("validation", config).map(|_| ())
    }

    fn describe(&self, config: &serde_yaml::Value) -> Option<String> {
        let config = ProcessConfig::parse("describe", config).ok()?;
        if config.args.is_empty() {
            Some(config.command)
        } else {
            Some(format!("{} {}", config.command, config.args.join(" ")))
        }
    }
}

/// Export params as environment variables. Keys that cannot be variable
/// names are left out.
pub(crate) fn apply_params_env(cmd: &mut Command, params: &RunParams) {
    for (key, value) in params {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            debug!("Skipping param '{}': not usable as an environment variable", key);
            continue;
        }
        cmd.env(key, param_to_string(value));
    }
}

/// Run a prepared command to completion and capture its output.
///
/// The child is killed if the returned future is dropped, which is how task
/// timeouts stop runaway processes.
pub(crate) async fn run_process(task_id: &str, mut cmd: Command) -> Result<TaskOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd.output().await.map_err(|e| ExecutionError::TaskFailed {
        task_id: task_id.to_string(),
        message: format!("failed to spawn: {}", e),
        exit_code: None,
        stderr: None,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();

    debug!("Task {} exited with {:?}", task_id, exit_code);

    if output.status.success() {
        return Ok(TaskOutput::Process {
            exit_code: 0,
            stdout,
            stderr,
        });
    }

    let mut message = match exit_code {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by signal".to_string(),
    };
    if let Some(last) = stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        message.push_str(": ");
        message.push_str(last.trim());
    }
    Err(ExecutionError::TaskFailed {
        task_id: task_id.to_string(),
        message,
        exit_code,
        stderr: Some(stderr),
    })
}
