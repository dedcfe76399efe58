// ABOUTME: Integration tests for definition parsing, validation and loading
// ABOUTME: Tests discovery, per-declaration containment, cron and cycle rejection, and reloads

use std::sync::Arc;

use cadence::parser::{DefinitionLoader, TaskKind, WorkflowValidator};
use cadence::tasks::TaskRegistry;

mod common;
use common::{TestEnvironment, TestTask, TestWorkflowBuilder};

fn loader(env: &TestEnvironment) -> DefinitionLoader {
    let validator = WorkflowValidator::new().with_task_registry(Arc::new(TaskRegistry::new()));
    DefinitionLoader::new(env.path(), validator)
}

#[tokio::test]
async fn test_load_all_discovers_nested_definitions() {
    let env = TestEnvironment::new();
    env.write(&TestWorkflowBuilder::new("top").add_echo_task("a", "hi"))
        .await;

    let nested = env.path().join("team").join("etl");
    tokio::fs::create_dir_all(&nested).await.unwrap();
    TestWorkflowBuilder::new("deep")
        .add_echo_task("a", "hi")
        .write_to(&nested)
        .await;

    env.write_raw("notes.yaml", "workflowId: ignored\ntasks: []\n")
        .await;

    let loader = loader(&env);
    let report = loader.load_all().await.unwrap();

    assert_eq!(report.loaded.len(), 2);
    assert!(report.failed.is_empty());
    let ids: Vec<String> = loader
        .get_all()
        .await
        .iter()
        .map(|w| w.workflow_id.clone())
        .collect();
    assert_eq!(ids, vec!["deep", "top"]);
    assert!(loader.get("ignored").await.is_none());
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let env = TestEnvironment::new();
    env.write(
        &TestWorkflowBuilder::new("same")
            .add_echo_task("a", "one")
            .add_dependent_task("b", "two", &["a"]),
    )
    .await;

    let loader = loader(&env);
    loader.load_all().await.unwrap();
    let first = loader.get("same").await.unwrap();
    loader.load_all().await.unwrap();
    let second = loader.get("same").await.unwrap();

    assert_eq!(loader.get_all().await.len(), 1);
    assert_eq!(first.task_ids(), second.task_ids());
    assert_eq!(first.tasks[1].depends_on, second.tasks[1].depends_on);
}

#[tokio::test]
async fn test_schedule_syntax_checked_at_load() {
    let env = TestEnvironment::new();
    env.write(
        &TestWorkflowBuilder::new("every_five")
            .with_schedule("*/5 * * * *")
            .add_echo_task("a", "tick"),
    )
    .await;
    env.write(
        &TestWorkflowBuilder::new("bad_minute")
            .with_schedule("99 * * * *")
            .add_echo_task("a", "tick"),
    )
    .await;
    env.write(
        &TestWorkflowBuilder::new("too_short")
            .with_schedule("* * *")
            .add_echo_task("a", "tick"),
    )
    .await;

    let loader = loader(&env);
    let report = loader.load_all().await.unwrap();

    assert_eq!(report.loaded, vec!["every_five"]);
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().all(|f| f.reason.contains("schedule")));
    assert!(loader.get("bad_minute").await.is_none());
}

#[tokio::test]
async fn test_cycles_and_unknown_dependencies_rejected() {
    let env = TestEnvironment::new();
    env.write(
        &TestWorkflowBuilder::new("cyclic")
            .with_task(TestTask::script("a", "true").depends_on(&["c"]))
            .with_task(TestTask::script("b", "true").depends_on(&["a"]))
            .with_task(TestTask::script("c", "true").depends_on(&["b"])),
    )
    .await;
    env.write(
        &TestWorkflowBuilder::new("dangling")
            .with_task(TestTask::script("a", "true").depends_on(&["ghost"])),
    )
    .await;
    env.write(&TestWorkflowBuilder::new("fine").add_echo_task("a", "ok"))
        .await;

    let loader = loader(&env);
    let report = loader.load_all().await.unwrap();

    assert_eq!(report.loaded, vec!["fine"]);

    let cyclic = report
        .failed
        .iter()
        .find(|f| f.workflow_id.as_deref() == Some("cyclic"))
        .unwrap();
    assert!(cyclic.reason.contains("Circular dependency"));

    let dangling = report
        .failed
        .iter()
        .find(|f| f.workflow_id.as_deref() == Some("dangling"))
        .unwrap();
    assert!(dangling.reason.contains("ghost"));
}

#[tokio::test]
async fn test_bad_declaration_does_not_discard_siblings() {
    let env = TestEnvironment::new();
    env.write_raw(
        "bundle.flow.yaml",
        r#"
workflows:
  - workflowId: good
    tasks:
      - { taskId: a, kind: script, config: { script: "true" } }
  - workflowId: empty
    tasks: []
  - workflowId: odd_kind
    tasks:
      - { taskId: a, kind: ftp, config: {} }
  - workflowId: typed_wrong
    tasks: "not a list"
---
workflowId: second_doc
tasks:
  - { taskId: a, kind: process, config: { command: "true" } }
"#,
    )
    .await;

    let loader = loader(&env);
    let report = loader.load_all().await.unwrap();

    assert_eq!(report.loaded, vec!["good", "second_doc"]);
    let mut failed: Vec<&str> = report
        .failed
        .iter()
        .filter_map(|f| f.workflow_id.as_deref())
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["empty", "odd_kind", "typed_wrong"]);
}

#[tokio::test]
async fn test_broken_file_is_skipped() {
    let env = TestEnvironment::new();
    env.write_raw("broken.flow.yaml", "workflowId: [unclosed\n").await;
    env.write(&TestWorkflowBuilder::new("ok").add_echo_task("a", "fine"))
        .await;

    let loader = loader(&env);
    let report = loader.load_all().await.unwrap();

    assert_eq!(report.loaded, vec!["ok"]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].workflow_id.is_none());
}

#[tokio::test]
async fn test_load_one_tracks_source_changes() {
    let env = TestEnvironment::new();
    let path = env
        .write_raw(
            "pair.flow.yaml",
            r#"
workflows:
  - workflowId: left
    tasks: [{ taskId: a, kind: script, config: { script: "true" } }]
  - workflowId: right
    tasks: [{ taskId: a, kind: script, config: { script: "true" } }]
"#,
        )
        .await;

    let loader = loader(&env);
    loader.load_all().await.unwrap();
    assert_eq!(loader.get_all().await.len(), 2);

    env.write_raw(
        "pair.flow.yaml",
        r#"
workflowId: left
tasks: [{ taskId: a, kind: script, config: { script: "echo v2" } }]
"#,
    )
    .await;

    let reloaded = loader.load_one(&path).await;
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].workflow_id, "left");
    assert!(loader.get("right").await.is_none());

    assert!(loader.remove("left").await);
    assert!(!loader.remove("left").await);
    assert!(loader.get_all().await.is_empty());
}

#[tokio::test]
async fn test_defaults_and_legacy_kinds() {
    let env = TestEnvironment::new();
    env.write_raw(
        "defaults.flow.yaml",
        r#"
workflowId: defaults
retries: 2
tasks:
  - { taskId: s, type: javascript, config: { script: "true" } }
  - { taskId: p, type: shell, timeoutMs: 1000, config: { command: "true" } }
  - { taskId: h, kind: http, retries: 0, config: { url: "http://localhost/" } }
"#,
    )
    .await;

    let loader = loader(&env);
    loader.load_all().await.unwrap();
    let workflow = loader.get("defaults").await.unwrap();

    let s = workflow.get_task("s").unwrap();
    assert_eq!(s.kind, TaskKind::Script);
    assert_eq!(s.retry_count(), 2);
    assert_eq!(s.timeout().as_millis(), 300_000);

    let p = workflow.get_task("p").unwrap();
    assert_eq!(p.kind, TaskKind::Process);
    assert_eq!(p.timeout().as_millis(), 1000);

    let h = workflow.get_task("h").unwrap();
    assert_eq!(h.retry_count(), 0);
    assert_eq!(h.timeout().as_millis(), 30_000);
}

#[tokio::test]
async fn test_rejected_edit_keeps_previous_definition() {
    let env = TestEnvironment::new();
    let path = env
        .write(
            &TestWorkflowBuilder::new("keep")
                .with_schedule("0 * * * *")
                .add_echo_task("a", "v1"),
        )
        .await;

    let loader = loader(&env);
    loader.load_all().await.unwrap();
    assert!(loader.get("keep").await.is_some());

    // The edit introduces a self-dependency and fails validation.
    env.write(
        &TestWorkflowBuilder::new("keep")
            .with_schedule("0 * * * *")
            .with_task(TestTask::script("a", "echo v2").depends_on(&["a"])),
    )
    .await;
    let reloaded = loader.load_one(&path).await;
    assert!(reloaded.is_empty());

    let kept = loader.get("keep").await.unwrap();
    assert!(kept.tasks[0].depends_on.is_empty());

    // The source mapping survives too, so deleting the file still removes it.
    assert_eq!(loader.remove_source(&path).await, vec!["keep"]);
    assert!(loader.get("keep").await.is_none());
}
