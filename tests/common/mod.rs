// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Builds workflow definition files in temp directories and wires test runtimes

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;

use cadence::engine::{CoordinatorConfig, Run};
use cadence::runtime::{Runtime, RuntimeSettings};
use cadence::tasks::secrets::{NoSecrets, SecretsProvider};

pub struct TestWorkflowBuilder {
    workflow_id: String,
    schedule: Option<String>,
    extra: Vec<String>,
    tasks: Vec<TestTask>,
}

pub struct TestTask {
    pub id: String,
    pub kind: String,
    pub config: Vec<(String, String)>,
    pub depends_on: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
}

impl TestTask {
    pub fn script(id: &str, script: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: "script".to_string(),
            config: vec![("script".to_string(), yaml_string(script))],
            depends_on: Vec::new(),
            timeout_ms: None,
            retries: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

fn yaml_string(value: &str) -> String {
    serde_json::to_string(value).unwrap()
}

impl TestWorkflowBuilder {
    pub fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            schedule: None,
            extra: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: &str) -> Self {
        self.schedule = Some(schedule.to_string());
        self
    }

    /// Add a raw top-level `key: value` line.
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.extra.push(format!("{}: {}", key, value));
        self
    }

    pub fn with_task(mut self, task: TestTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn add_echo_task(self, id: &str, message: &str) -> Self {
        self.with_task(TestTask::script(id, &format!("echo {}", message)))
    }

    pub fn add_dependent_task(self, id: &str, message: &str, depends_on: &[&str]) -> Self {
        self.with_task(TestTask::script(id, &format!("echo {}", message)).depends_on(depends_on))
    }

    pub fn add_failing_task(self, id: &str) -> Self {
        self.with_task(TestTask::script(id, "echo boom >&2; exit 3"))
    }

    pub fn generate_yaml(&self) -> String {
        let mut yaml = format!("workflowId: {}\n", self.workflow_id);
        if let Some(ref schedule) = self.schedule {
            yaml.push_str(&format!("schedule: \"{}\"\n", schedule));
        }
        for line in &self.extra {
            yaml.push_str(line);
            yaml.push('\n');
        }

        yaml.push_str("tasks:\n");
        for task in &self.tasks {
            yaml.push_str(&format!("  - taskId: {}\n", task.id));
            yaml.push_str(&format!("    kind: {}\n", task.kind));
            if !task.depends_on.is_empty() {
                yaml.push_str(&format!("    dependsOn: [{}]\n", task.depends_on.join(", ")));
            }
            if let Some(timeout_ms) = task.timeout_ms {
                yaml.push_str(&format!("    timeoutMs: {}\n", timeout_ms));
            }
            if let Some(retries) = task.retries {
                yaml.push_str(&format!("    retries: {}\n", retries));
            }
            yaml.push_str("    config:\n");
            for (key, value) in &task.config {
                yaml.push_str(&format!("      {}: {}\n", key, value));
            }
        }

        yaml
    }

    pub async fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}.flow.yaml", self.workflow_id));
        fs::write(&path, self.generate_yaml())
            .await
            .expect("Failed to write definition file");
        path
    }
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn write(&self, builder: &TestWorkflowBuilder) -> PathBuf {
        builder.write_to(self.path()).await
    }

    pub async fn write_raw(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content)
            .await
            .expect("Failed to write definition file");
        path
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime_with(CoordinatorConfig::default(), Arc::new(NoSecrets))
    }

    pub fn runtime_with(
        &self,
        coordinator: CoordinatorConfig,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Runtime {
        Runtime::new(
            RuntimeSettings {
                definitions_dir: self.path().to_path_buf(),
                coordinator,
            },
            secrets,
        )
    }
}

/// Trigger a workflow and wait for its run, failing the test after `limit`.
pub async fn run_to_completion(runtime: &Runtime, workflow_id: &str, limit: Duration) -> Run {
    let run_id = runtime
        .scheduler
        .trigger(workflow_id, Default::default())
        .await
        .expect("trigger failed");
    tokio::time::timeout(limit, runtime.coordinator.wait_for_run(&run_id))
        .await
        .expect("run did not finish in time")
        .expect("run disappeared")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_builder() {
        let yaml = TestWorkflowBuilder::new("builder")
            .with_schedule("*/5 * * * *")
            .add_echo_task("a", "hello")
            .add_dependent_task("b", "world", &["a"])
            .generate_yaml();

        let workflow = cadence::Workflow::from_yaml(&yaml).unwrap();
        assert_eq!(workflow.workflow_id, "builder");
        assert_eq!(workflow.schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(workflow.tasks.len(), 2);
        assert_eq!(workflow.tasks[1].depends_on, vec!["a"]);
    }
}
