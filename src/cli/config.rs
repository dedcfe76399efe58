// ABOUTME: Configuration management for the cadence orchestrator
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::CoordinatorConfig;
use crate::runtime::RuntimeSettings;
use crate::tasks::secrets::{ChainedSecrets, EnvSecrets, SecretsProvider, StaticSecrets};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub definitions_dir: PathBuf,
    pub max_concurrent_runs: usize,
    pub max_concurrent_tasks: usize,
    pub shutdown_timeout_secs: u64,
    pub secrets: SecretsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// Enables environment-backed secrets: `KEY` is read from `<prefix>KEY`.
    pub env_prefix: Option<String>,
    pub values: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        Self {
            definitions_dir: PathBuf::from("./workflows"),
            max_concurrent_runs: coordinator.max_concurrent_runs,
            max_concurrent_tasks: coordinator.max_concurrent_tasks,
            shutdown_timeout_secs: 30,
            secrets: SecretsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let explicit = path.is_some();
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid config {}", config_path.display()))?
        } else if explicit {
            return Err(anyhow::anyhow!(
                "Config file not found: {}",
                config_path.display()
            ));
        } else {
            Config::default()
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("cadence.yaml"),
            PathBuf::from("cadence.yml"),
            PathBuf::from(".cadence.yaml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".cadence").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from("cadence.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("CADENCE_DEFINITIONS_DIR") {
            self.definitions_dir = PathBuf::from(dir);
        }
        if let Ok(max_runs) = std::env::var("CADENCE_MAX_CONCURRENT_RUNS") {
            self.max_concurrent_runs = max_runs
                .parse()
                .context("CADENCE_MAX_CONCURRENT_RUNS must be a number")?;
        }
        if let Ok(max_tasks) = std::env::var("CADENCE_MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = max_tasks
                .parse()
                .context("CADENCE_MAX_CONCURRENT_TASKS must be a number")?;
        }

        if let Ok(level) = std::env::var("CADENCE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CADENCE_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            definitions_dir: self.definitions_dir.clone(),
            coordinator: CoordinatorConfig {
                max_concurrent_runs: self.max_concurrent_runs.max(1),
                max_concurrent_tasks: self.max_concurrent_tasks.max(1),
            },
        }
    }

    /// Static values first, then the environment when a prefix is configured.
    pub fn secrets_provider(&self) -> Arc<dyn SecretsProvider> {
        let mut providers: Vec<Box<dyn SecretsProvider>> =
            vec![Box::new(StaticSecrets::new(self.secrets.values.clone()))];
        if let Some(ref prefix) = self.secrets.env_prefix {
            providers.push(Box::new(EnvSecrets::new(prefix.clone())));
        }
        Arc::new(ChainedSecrets::new(providers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.definitions_dir, PathBuf::from("./workflows"));
        assert_eq!(config.max_concurrent_runs, 10);
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cadence.yaml");
        std::fs::write(
            &path,
            r#"
definitions_dir: /srv/flows
max_concurrent_tasks: 8
secrets:
  values:
    API_TOKEN: abc
logging:
  format: compact
"#,
        )
        .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.definitions_dir, PathBuf::from("/srv/flows"));
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.max_concurrent_runs, 10);
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.logging.level, "info");

        let secrets = config.secrets_provider();
        assert_eq!(secrets.get("API_TOKEN").as_deref(), Some("abc"));
        assert_eq!(secrets.get("MISSING"), None);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Config::load(Some(dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn test_runtime_settings_never_zero() {
        let config = Config {
            max_concurrent_runs: 0,
            max_concurrent_tasks: 0,
            ..Config::default()
        };
        let settings = config.runtime_settings();
        assert_eq!(settings.coordinator.max_concurrent_runs, 1);
        assert_eq!(settings.coordinator.max_concurrent_tasks, 1);
    }
}
