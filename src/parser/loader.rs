// ABOUTME: Definition loader that discovers workflow files and owns the workflow registry
// ABOUTME: Converts, validates and registers declarations with per-definition error containment

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::error::{ParserError, Result};
use super::validation::WorkflowValidator;
use super::workflow::{Workflow, WorkflowParser};

/// File suffixes recognised as workflow definitions.
pub const DEFINITION_SUFFIXES: &[&str] = &[".flow.yaml", ".flow.yml"];

/// Whether a path names a workflow definition file.
pub fn is_definition_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| DEFINITION_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
        .unwrap_or(false)
}

/// A definition that was skipped, with the reason it was rejected.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub source: PathBuf,
    pub workflow_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
    pub warnings: Vec<String>,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.loaded.extend(other.loaded);
        self.failed.extend(other.failed);
        self.warnings.extend(other.warnings);
    }
}

/// Authoritative in-memory registry of workflows, keyed by workflow id.
///
/// The loader is the only writer. Readers receive `Arc<Workflow>` snapshots
/// so that a reload never mutates a workflow a running execution holds.
pub struct DefinitionLoader {
    source_dir: PathBuf,
    parser: WorkflowParser,
    validator: WorkflowValidator,
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    sources: RwLock<HashMap<PathBuf, Vec<String>>>,
}

impl DefinitionLoader {
    pub fn new(source_dir: impl Into<PathBuf>, validator: WorkflowValidator) -> Self {
        Self {
            source_dir: source_dir.into(),
            parser: WorkflowParser::new(),
            validator,
            workflows: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Discover every definition file under the source directory and merge
    /// the valid workflows into the registry.
    ///
    /// Only failure to acquire the directory itself is an error; bad
    /// definitions are logged and reported in the returned `LoadReport`.
    #[instrument(skip(self), fields(dir = %self.source_dir.display()))]
    pub async fn load_all(&self) -> Result<LoadReport> {
        tokio::fs::create_dir_all(&self.source_dir)
            .await
            .map_err(|e| ParserError::DefinitionsDir {
                path: self.source_dir.clone(),
                reason: e.to_string(),
            })?;

        let metadata = tokio::fs::metadata(&self.source_dir)
            .await
            .map_err(|e| ParserError::DefinitionsDir {
                path: self.source_dir.clone(),
                reason: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(ParserError::DefinitionsDir {
                path: self.source_dir.clone(),
                reason: "not a directory".to_string(),
            });
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&self.source_dir).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_definition_file(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry in definitions directory: {}", e),
            }
        }
        files.sort();

        let mut report = LoadReport::default();
        for path in files {
            report.merge(self.load_file(&path).await);
        }

        info!(
            "Loaded {} workflow(s) from {} ({} skipped)",
            report.loaded.len(),
            self.source_dir.display(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Reload a single definition file.
    ///
    /// Returns the workflows that were registered from it. Workflows the file
    /// previously declared but no longer does are removed from the registry;
    /// a workflow whose new declaration is rejected keeps its previous entry.
    pub async fn load_one(&self, path: impl AsRef<Path>) -> Vec<Arc<Workflow>> {
        let path = path.as_ref();
        let report = self.load_file(path).await;

        let workflows = self.workflows.read().await;
        report
            .loaded
            .iter()
            .filter_map(|id| workflows.get(id).cloned())
            .collect()
    }

    /// Load one definition file and report what was registered or skipped.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn load_file(&self, path: &Path) -> LoadReport {
        let mut report = LoadReport::default();

        let declarations = match self.parser.parse_file(path).await {
            Ok(declarations) => declarations,
            Err(e) => {
                warn!("Skipping definition file {}: {}", path.display(), e);
                report.failed.push(LoadFailure {
                    source: path.to_path_buf(),
                    workflow_id: None,
                    reason: e.to_string(),
                });
                return report;
            }
        };

        let mut accepted: Vec<Workflow> = Vec::new();
        let mut declared: Vec<String> = Vec::new();
        for declaration in declarations {
            let label = declaration.label().to_string();
            if let Some(id) = &declaration.workflow_id {
                declared.push(id.clone());
            }
            let workflow = match declaration.into_workflow() {
                Ok(workflow) => workflow,
                Err(e) => {
                    warn!("Skipping workflow '{}' in {}: {}", label, path.display(), e);
                    report.failed.push(LoadFailure {
                        source: path.to_path_buf(),
                        workflow_id: Some(label),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let validation = self.validator.validate(&workflow);
            for warning in &validation.warnings {
                warn!("Workflow '{}': {}", workflow.workflow_id, warning);
                report
                    .warnings
                    .push(format!("{}: {}", workflow.workflow_id, warning));
            }

            if !validation.is_valid {
                warn!(
                    "Skipping invalid workflow '{}' in {}: {}",
                    label,
                    path.display(),
                    validation.error_summary()
                );
                report.failed.push(LoadFailure {
                    source: path.to_path_buf(),
                    workflow_id: Some(label),
                    reason: validation.error_summary(),
                });
                continue;
            }

            if accepted.iter().any(|w| w.workflow_id == workflow.workflow_id) {
                warn!(
                    "Workflow '{}' declared twice in {}; keeping the first",
                    workflow.workflow_id,
                    path.display()
                );
                report.failed.push(LoadFailure {
                    source: path.to_path_buf(),
                    workflow_id: Some(label),
                    reason: "duplicate workflowId within file".to_string(),
                });
                continue;
            }

            accepted.push(workflow);
        }

        let ids: Vec<String> = accepted.iter().map(|w| w.workflow_id.clone()).collect();

        {
            let mut workflows = self.workflows.write().await;
            let mut sources = self.sources.write().await;

            // A rejected edit keeps the previous definition registered.
            let mut owned = ids.clone();
            if let Some(previous) = sources.get(path) {
                for id in previous.iter().filter(|id| !ids.contains(id)) {
                    if declared.contains(id) {
                        warn!(
                            "Keeping previous definition of workflow '{}' from {}",
                            id,
                            path.display()
                        );
                        owned.push(id.clone());
                    } else {
                        workflows.remove(id);
                        info!("Workflow '{}' no longer declared in {}", id, path.display());
                    }
                }
            }

            for workflow in accepted {
                let id = workflow.workflow_id.clone();
                if let Some(owner) = sources
                    .iter()
                    .find(|(source, owned)| source.as_path() != path && owned.contains(&id))
                    .map(|(source, _)| source.clone())
                {
                    warn!(
                        "Workflow '{}' from {} replaces the definition from {}",
                        id,
                        path.display(),
                        owner.display()
                    );
                    if let Some(owned) = sources.get_mut(&owner) {
                        owned.retain(|owned_id| owned_id != &id);
                    }
                }
                debug!("Registered workflow '{}'", id);
                workflows.insert(id, Arc::new(workflow));
            }

            sources.insert(path.to_path_buf(), owned);
        }

        report.loaded = ids;
        report
    }

    /// Remove a workflow by id. Returns whether it was present.
    pub async fn remove(&self, workflow_id: &str) -> bool {
        let removed = self.workflows.write().await.remove(workflow_id).is_some();

        let mut sources = self.sources.write().await;
        for owned in sources.values_mut() {
            owned.retain(|id| id != workflow_id);
        }

        if removed {
            info!("Removed workflow '{}'", workflow_id);
        }
        removed
    }

    /// Remove every workflow that was loaded from `path`.
    pub async fn remove_source(&self, path: impl AsRef<Path>) -> Vec<String> {
        let path = path.as_ref();
        let owned = self.sources.write().await.remove(path).unwrap_or_default();

        let mut workflows = self.workflows.write().await;
        for id in &owned {
            workflows.remove(id);
            info!("Removed workflow '{}' (source {} deleted)", id, path.display());
        }
        owned
    }

    pub async fn get(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// All registered workflows, ordered by id.
    pub async fn get_all(&self) -> Vec<Arc<Workflow>> {
        let mut all: Vec<Arc<Workflow>> = self.workflows.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        all
    }

    /// Register an already-built workflow after validating it.
    pub async fn insert(&self, workflow: Workflow) -> Result<Arc<Workflow>> {
        let validation = self.validator.validate(&workflow);
        if let Some(error) = validation.errors.into_iter().next() {
            return Err(ParserError::ValidationError(error));
        }

        let workflow = Arc::new(workflow);
        self.workflows
            .write()
            .await
            .insert(workflow.workflow_id.clone(), workflow.clone());
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{TaskConfig, TaskKind};
    use tempfile::TempDir;

    const VALID: &str = r#"
workflowId: hello
tasks:
  - taskId: greet
    kind: process
    config: { command: echo hello }
"#;

    #[test]
    fn test_is_definition_file() {
        assert!(is_definition_file(Path::new("a/b/etl.flow.yaml")));
        assert!(is_definition_file(Path::new("etl.flow.yml")));
        assert!(!is_definition_file(Path::new("etl.yaml")));
        assert!(!is_definition_file(Path::new("flow.yaml")));
    }

    #[tokio::test]
    async fn test_load_all_skips_invalid_definitions() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("hello.flow.yaml"), VALID)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("broken.flow.yaml"), "workflowId: [unclosed")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("ignored.yaml"), VALID)
            .await
            .unwrap();

        let loader = DefinitionLoader::new(dir.path(), WorkflowValidator::new());
        let report = loader.load_all().await.unwrap();

        assert_eq!(report.loaded, vec!["hello"]);
        assert_eq!(report.failed.len(), 1);
        assert!(loader.get("hello").await.is_some());
        assert_eq!(loader.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_one_drops_ids_no_longer_declared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pair.flow.yaml");
        let both = r#"
workflows:
  - workflowId: one
    tasks: [{ taskId: a, kind: script, config: { script: "true" } }]
  - workflowId: two
    tasks: [{ taskId: a, kind: script, config: { script: "true" } }]
"#;
        tokio::fs::write(&path, both).await.unwrap();

        let loader = DefinitionLoader::new(dir.path(), WorkflowValidator::new());
        assert_eq!(loader.load_one(&path).await.len(), 2);

        let only_one = r#"
workflowId: one
tasks: [{ taskId: a, kind: script, config: { script: "true" } }]
"#;
        tokio::fs::write(&path, only_one).await.unwrap();
        let loaded = loader.load_one(&path).await;

        assert_eq!(loaded.len(), 1);
        assert!(loader.get("two").await.is_none());

        assert_eq!(loader.remove_source(&path).await, vec!["one"]);
        assert!(loader.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let loader = DefinitionLoader::new("unused", WorkflowValidator::new());
        let workflow = Workflow::new("manual").with_task(
            TaskConfig::new("a", TaskKind::Script)
                .with_config(serde_yaml::from_str("script: \"true\"").unwrap()),
        );
        loader.insert(workflow).await.unwrap();

        assert!(loader.remove("manual").await);
        assert!(!loader.remove("manual").await);
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_workflow() {
        let loader = DefinitionLoader::new("unused", WorkflowValidator::new());
        let result = loader.insert(Workflow::new("empty")).await;
        assert!(matches!(
            result,
            Err(ParserError::ValidationError(
                crate::parser::ValidationError::EmptyWorkflow
            ))
        ));
    }

    #[tokio::test]
    async fn test_source_dir_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not_a_dir");
        tokio::fs::write(&file, "x").await.unwrap();

        let loader = DefinitionLoader::new(&file, WorkflowValidator::new());
        assert!(matches!(
            loader.load_all().await,
            Err(ParserError::DefinitionsDir { .. })
        ));
    }
}
