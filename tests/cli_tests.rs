// ABOUTME: Integration tests for the CLI application
// ABOUTME: Tests command-line interface functionality and end-to-end workflow execution

use std::path::Path;
use std::process::{Command, Output};

mod common;
use common::{TestEnvironment, TestWorkflowBuilder};

fn cadence(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cadence"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .env("CADENCE_LOG_LEVEL", "warn")
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_help_command() {
    let env = TestEnvironment::new();
    let output = cadence(&["--help"], env.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cadence"));
    for command in ["serve", "run", "validate", "list"] {
        assert!(stdout.contains(command), "help lacks {}", command);
    }
}

#[test]
fn test_cli_version_command() {
    let env = TestEnvironment::new();
    let output = cadence(&["--version"], env.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_cli_run_writes_json_output() {
    let env = TestEnvironment::new();
    let flows = env.path().join("flows");
    tokio::fs::create_dir_all(&flows).await.unwrap();
    TestWorkflowBuilder::new("cli_run")
        .add_echo_task("hello", "hi")
        .add_dependent_task("bye", "done", &["hello"])
        .write_to(&flows)
        .await;

    let out_file = env.path().join("run.json");
    let output = cadence(
        &[
            "run",
            "cli_run",
            "--definitions",
            flows.to_str().unwrap(),
            "-p",
            "who=world",
            "--output",
            out_file.to_str().unwrap(),
        ],
        env.path(),
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let content = tokio::fs::read_to_string(&out_file).await.unwrap();
    let run: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(run["workflowId"], "cli_run");
    assert_eq!(run["status"], "success");
    assert_eq!(run["trigger"], "manual");
    assert_eq!(run["params"]["who"], "world");
    assert_eq!(run["tasks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cli_run_failure_exit_code() {
    let env = TestEnvironment::new();
    env.write(&TestWorkflowBuilder::new("cli_fail").add_failing_task("oops"))
        .await;

    let output = cadence(
        &["run", "cli_fail", "--definitions", env.path().to_str().unwrap()],
        env.path(),
    );

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("failed"));
}

#[tokio::test]
async fn test_cli_run_unknown_workflow() {
    let env = TestEnvironment::new();
    let output = cadence(
        &["run", "missing", "--definitions", env.path().to_str().unwrap()],
        env.path(),
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"));
}

#[tokio::test]
async fn test_cli_validate() {
    let env = TestEnvironment::new();
    let good = env
        .write(&TestWorkflowBuilder::new("valid_one").add_echo_task("a", "ok"))
        .await;

    let output = cadence(&["validate", good.to_str().unwrap()], env.path());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("valid_one"));

    env.write(
        &TestWorkflowBuilder::new("broken")
            .with_schedule("61 * * * *")
            .add_echo_task("a", "never"),
    )
    .await;

    let output = cadence(&["validate", env.path().to_str().unwrap()], env.path());
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("✓ valid_one"));
    assert!(stdout.contains("✗ broken"));
}

#[tokio::test]
async fn test_cli_list_shows_schedules() {
    let env = TestEnvironment::new();
    env.write(
        &TestWorkflowBuilder::new("nightly")
            .with_schedule("0 3 * * *")
            .add_echo_task("a", "night"),
    )
    .await;
    env.write(&TestWorkflowBuilder::new("manual").add_echo_task("a", "adhoc"))
        .await;

    let output = cadence(
        &["list", "--definitions", env.path().to_str().unwrap()],
        env.path(),
    );
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let nightly = stdout.lines().find(|l| l.starts_with("nightly")).unwrap();
    assert!(nightly.contains("0 3 * * *"));
    assert!(nightly.contains("T03:00:00"));
    let manual = stdout.lines().find(|l| l.starts_with("manual")).unwrap();
    assert!(manual.contains("on demand"));
}
