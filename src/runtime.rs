// ABOUTME: Wiring of loader, executor, coordinator and scheduler into one runtime
// ABOUTME: Every component receives its collaborators explicitly through its constructor

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::engine::{CoordinatorConfig, ExecutionCoordinator, Result};
use crate::parser::{DefinitionLoader, LoadReport, WorkflowValidator};
use crate::scheduler::WorkflowScheduler;
use crate::tasks::secrets::SecretsProvider;
use crate::tasks::{TaskExecutor, TaskRegistry};

/// Settings needed to assemble a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub definitions_dir: std::path::PathBuf,
    pub coordinator: CoordinatorConfig,
}

/// The assembled orchestrator.
pub struct Runtime {
    pub loader: Arc<DefinitionLoader>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub scheduler: WorkflowScheduler,
}

impl Runtime {
    pub fn new(settings: RuntimeSettings, secrets: Arc<dyn SecretsProvider>) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let validator = WorkflowValidator::new().with_task_registry(Arc::clone(&registry));
        let loader = Arc::new(DefinitionLoader::new(settings.definitions_dir, validator));

        let executor = Arc::new(TaskExecutor::new(registry, secrets));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&loader),
            executor,
            settings.coordinator,
        ));
        let scheduler = WorkflowScheduler::new(Arc::clone(&loader), Arc::clone(&coordinator));

        Self {
            loader,
            coordinator,
            scheduler,
        }
    }

    /// Load definitions and start every timer.
    pub async fn start(&self) -> Result<LoadReport> {
        self.scheduler.start().await
    }

    /// Reload one definition file and reschedule what it declares.
    ///
    /// Workflows the file stopped declaring lose their timers.
    pub async fn reload_definition(&self, path: impl AsRef<Path>) -> Vec<String> {
        let path = path.as_ref();
        let before: Vec<String> = self
            .loader
            .get_all()
            .await
            .iter()
            .map(|w| w.workflow_id.clone())
            .collect();

        let loaded = self.loader.load_one(path).await;
        for workflow in &loaded {
            if let Err(e) = self.scheduler.schedule(workflow).await {
                tracing::warn!("Could not schedule {}: {}", workflow.workflow_id, e);
            }
        }

        for id in before {
            if self.loader.get(&id).await.is_none() {
                self.scheduler.unschedule(&id).await;
            }
        }

        loaded.iter().map(|w| w.workflow_id.clone()).collect()
    }

    /// Drop every workflow declared by a deleted definition file.
    pub async fn remove_definition(&self, path: impl AsRef<Path>) -> Vec<String> {
        let removed = self.loader.remove_source(path).await;
        for id in &removed {
            self.scheduler.unschedule(id).await;
        }
        removed
    }

    /// Stop timers, then drain runs, cancelling whatever outlives `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Vec<String> {
        info!("Runtime shutting down");
        self.scheduler.stop().await;
        self.coordinator.shutdown(timeout).await
    }
}
