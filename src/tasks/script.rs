// ABOUTME: Script task implementation running inline script bodies in a child interpreter
// ABOUTME: Writes the body to a temp file and exposes params through the environment

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use super::process::{apply_params_env, default_shell, run_process};
use super::{config_error, TaskImplementation, TaskOutput};
use crate::engine::error::{ExecutionError, Result};
use crate::parser::{RunParams, TaskConfig};

pub struct ScriptTask;

/// Configuration for script tasks
///
/// The body runs in its own interpreter process. Every param is exported as
/// an environment variable, and the whole param set is also available as
/// JSON in `TASK_PARAMS`.
///
/// ```yaml
/// kind: script
/// config:
///   interpreter: /bin/bash
///   script: |
///     set -eu
///     echo "rotating logs for $SERVICE"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub script: String,

    #[serde(default = "default_shell")]
    pub interpreter: String,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ScriptConfig {
    fn parse(task_id: &str, config: &serde_yaml::Value) -> Result<Self> {
        let config: ScriptConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| config_error(task_id, "script", e))?;

        if config.script.trim().is_empty() {
            return Err(config_error(task_id, "script", "script cannot be empty"));
        }
        if config.interpreter.trim().is_empty() {
            return Err(config_error(task_id, "script", "interpreter cannot be empty"));
        }
        Ok(config)
    }
}

#[async_trait]
impl TaskImplementation for ScriptTask {
    async fn execute(&self, task: &TaskConfig, params: &RunParams) -> Result<TaskOutput> {
        let config = ScriptConfig::parse(&task.task_id, &task.config)?;

        info!(
            "Executing script task: {} - using {}",
            task.task_id, config.interpreter
        );

        let script_file = write_script(&task.task_id, &config.script)?;
        debug!(
            "Script for {} written to {} ({} bytes)",
            task.task_id,
            script_file.path().display(),
            config.script.len()
        );

        let params_json = serde_json::to_string(params).map_err(|e| ExecutionError::ConfigError {
            task_id: task.task_id.clone(),
            message: format!("params are not serializable: {}", e),
        })?;

        let mut cmd = Command::new(&config.interpreter);
        cmd.arg(script_file.path());
        apply_params_env(&mut cmd, params);
        cmd.env("TASK_ID", &task.task_id);
        cmd.env("TASK_PARAMS", params_json);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        // script_file must outlive the child
        let result = run_process(&task.task_id, cmd).await;
        drop(script_file);
        result
    }

    fn task_type(&self) -> &'static str {
        "script"
    }

    fn validate_config(&self, config: &serde_yaml::Value) -> Result<()> {
        ScriptConfig::parse("validation", config).map(|_| ())
    }
}

fn write_script(task_id: &str, body: &str) -> Result<NamedTempFile> {
    let failed = |e: std::io::Error| ExecutionError::TaskFailed {
        task_id: task_id.to_string(),
        message: format!("failed to write script file: {}", e),
        exit_code: None,
        stderr: None,
    };

    let mut file = tempfile::Builder::new()
        .prefix("cadence-script-")
        .tempfile()
        .map_err(failed)?;
    file.write_all(body.as_bytes()).map_err(failed)?;
    file.flush().map_err(failed)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TaskKind;
    use serde_json::json;

    fn task(config: &str) -> TaskConfig {
        TaskConfig::new("script", TaskKind::Script).with_config(serde_yaml::from_str(config).unwrap())
    }

    #[tokio::test]
    async fn test_multiline_script_sees_params() {
        let config = r#"
script: |
  greeting="hi"
  echo "$greeting $WHO"
  echo "$TASK_ID"
  echo "$TASK_PARAMS"
"#;
        let mut params = RunParams::new();
        params.insert("WHO".to_string(), json!("there"));

        let output = ScriptTask.execute(&task(config), &params).await.unwrap();
        let lines: Vec<&str> = output.text().lines().collect();

        assert_eq!(lines[0], "hi there");
        assert_eq!(lines[1], "script");
        let parsed: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed, json!({"WHO": "there"}));
    }

    #[tokio::test]
    async fn test_failing_script() {
        let config = "script: |\n  echo partial\n  echo broken >&2\n  exit 7\n";
        let result = ScriptTask.execute(&task(config), &RunParams::new()).await;

        match result {
            Err(ExecutionError::TaskFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(7));
                assert!(stderr.unwrap().contains("broken"));
            }
            other => panic!("expected TaskFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_failure() {
        let config = "script: echo hi\ninterpreter: /nonexistent/interpreter\n";
        let result = ScriptTask.execute(&task(config), &RunParams::new()).await;
        assert!(matches!(
            result,
            Err(ExecutionError::TaskFailed { exit_code: None, .. })
        ));
    }

    #[test]
    fn test_validate_config() {
        assert!(ScriptTask
            .validate_config(&serde_yaml::from_str("script: echo ok").unwrap())
            .is_ok());
        assert!(ScriptTask
            .validate_config(&serde_yaml::from_str("script: \"  \"").unwrap())
            .is_err());
        assert!(ScriptTask
            .validate_config(&serde_yaml::from_str("interpreter: /bin/sh").unwrap())
            .is_err());
    }
}
