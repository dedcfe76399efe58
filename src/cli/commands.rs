// ABOUTME: Command implementations for the cadence CLI
// ABOUTME: Handles the serve, run, validate and list commands

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::config::Config;
use crate::engine::RunStatus;
use crate::parser::{DefinitionLoader, LoadReport, RunParams, WorkflowValidator};
use crate::runtime::Runtime;
use crate::tasks::TaskRegistry;

fn build_runtime(config: &Config) -> Runtime {
    Runtime::new(config.runtime_settings(), config.secrets_provider())
}

fn print_load_report(report: &LoadReport) {
    for id in &report.loaded {
        println!("✓ {}", id);
    }
    for failure in &report.failed {
        println!(
            "✗ {} ({}): {}",
            failure.workflow_id.as_deref().unwrap_or("<file>"),
            failure.source.display(),
            failure.reason
        );
    }
    for warning in &report.warnings {
        println!("! {}", warning);
    }
}

/// Load and schedule every definition, then run until Ctrl-C.
pub async fn serve(config: &Config) -> Result<()> {
    info!(
        "Serving workflows from {}",
        config.definitions_dir.display()
    );

    let runtime = build_runtime(config);
    let report = runtime
        .start()
        .await
        .context("Failed to load workflow definitions")?;
    print_load_report(&report);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Interrupt received, shutting down");
    let cancelled = runtime.shutdown(config.shutdown_timeout()).await;
    if !cancelled.is_empty() {
        println!("Cancelled {} unfinished run(s)", cancelled.len());
    }
    Ok(())
}

/// Trigger one workflow, wait for its run and report the outcome.
pub async fn run_workflow(
    workflow_id: String,
    params: RunParams,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    info!("Running workflow '{}'", workflow_id);

    let runtime = build_runtime(config);
    let report = runtime
        .loader
        .load_all()
        .await
        .context("Failed to load workflow definitions")?;
    if let Some(failure) = report
        .failed
        .iter()
        .find(|f| f.workflow_id.as_deref() == Some(workflow_id.as_str()))
    {
        return Err(anyhow::anyhow!(
            "Workflow '{}' is invalid: {}",
            workflow_id,
            failure.reason
        ));
    }

    let run_id = runtime
        .scheduler
        .trigger(&workflow_id, params)
        .await
        .with_context(|| format!("Failed to trigger '{}'", workflow_id))?;
    let run = runtime.coordinator.wait_for_run(&run_id).await?;
    runtime.shutdown(Duration::ZERO).await;

    if let Some(output_path) = output {
        let json_content =
            serde_json::to_string_pretty(&run).context("Failed to serialize run to JSON")?;
        std::fs::write(&output_path, json_content).with_context(|| {
            format!("Failed to write output file '{}'", output_path.display())
        })?;
        info!("Run written to: {}", output_path.display());
    } else {
        println!(
            "Workflow '{}' run {} finished with status: {}",
            run.workflow_id, run.run_id, run.status
        );
        for task in &run.tasks {
            println!(
                "  Task '{}': {} ({} attempt(s))",
                task.task_id, task.status, task.attempts
            );
            if let Some(ref error) = task.error {
                println!("    Error: {}", error);
            }
            if let Some(ref output) = task.output {
                let text = output.text().trim();
                if !text.is_empty() {
                    println!("    Output: {}", text);
                }
            }
        }
    }

    match run.status {
        RunStatus::Success => Ok(()),
        status => Err(anyhow::anyhow!(
            "Workflow '{}' finished with status {}: {}",
            run.workflow_id,
            status,
            run.error.as_deref().unwrap_or("no error recorded")
        )),
    }
}

/// Validate a definition file or every definition under a directory.
pub async fn validate(path: PathBuf) -> Result<()> {
    info!("Validating definitions at {}", path.display());

    let validator = WorkflowValidator::new().with_task_registry(Arc::new(TaskRegistry::new()));

    let report = if path.is_dir() {
        DefinitionLoader::new(&path, validator)
            .load_all()
            .await
            .context("Failed to read definitions directory")?
    } else if path.is_file() {
        let dir = path.parent().unwrap_or(Path::new("."));
        DefinitionLoader::new(dir, validator).load_file(&path).await
    } else {
        return Err(anyhow::anyhow!("No such file or directory: {}", path.display()));
    };

    print_load_report(&report);

    if report.failed.is_empty() {
        println!("{} workflow(s) valid", report.loaded.len());
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} definition(s) failed validation",
            report.failed.len()
        ))
    }
}

/// List loaded workflows with their schedules and next fire times.
pub async fn list(config: &Config) -> Result<()> {
    let runtime = build_runtime(config);
    runtime
        .start()
        .await
        .context("Failed to load workflow definitions")?;

    let workflows = runtime.loader.get_all().await;
    if workflows.is_empty() {
        println!("No workflows in {}", config.definitions_dir.display());
    }

    for workflow in workflows {
        let next = runtime
            .scheduler
            .next_fire_time(&workflow.workflow_id)
            .await
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{} task(s)\tnext: {}",
            workflow.workflow_id,
            workflow.schedule.as_deref().unwrap_or("on demand"),
            workflow.tasks.len(),
            next
        );
    }

    runtime.shutdown(Duration::ZERO).await;
    Ok(())
}
