// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for cadence

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::parser::RunParams;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "A lightweight workflow orchestrator for cron-scheduled task graphs")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long, global = true, help = "Maximum number of concurrent tasks")]
    pub max_concurrent_tasks: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load definitions, schedule them and run until interrupted
    Serve {
        #[arg(short, long, help = "Directory holding *.flow.yaml definitions")]
        definitions: Option<PathBuf>,
    },

    /// Trigger one workflow and wait for it to finish
    Run {
        #[arg(help = "Id of the workflow to run")]
        workflow_id: String,

        #[arg(short, long, help = "Directory holding *.flow.yaml definitions")]
        definitions: Option<PathBuf>,

        #[arg(short = 'p', long = "param", help = "Run parameter (key=value)")]
        params: Vec<String>,

        #[arg(short, long, help = "Write the finished run as JSON to this file")]
        output: Option<PathBuf>,
    },

    /// Validate a definition file or a directory of definitions
    Validate {
        #[arg(help = "Path to a definition file or directory")]
        path: PathBuf,
    },

    /// List loaded workflows with their schedules
    List {
        #[arg(short, long, help = "Directory holding *.flow.yaml definitions")]
        definitions: Option<PathBuf>,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse run parameters from key=value format.
    ///
    /// Values that parse as JSON keep their type; anything else is a string.
    pub fn parse_params(params: &[String]) -> anyhow::Result<RunParams> {
        let mut parsed = RunParams::new();

        for param in params {
            let Some((key, value)) = param.split_once('=') else {
                return Err(anyhow::anyhow!(
                    "Invalid parameter format '{}'. Expected 'key=value'",
                    param
                ));
            };
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            parsed.insert(key.to_string(), value);
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        let params = vec![
            "env=production".to_string(),
            "batch=50".to_string(),
            "dry=true".to_string(),
            "url=http://x?a=b".to_string(),
        ];

        let parsed = Args::parse_params(&params).unwrap();

        assert_eq!(parsed["env"], json!("production"));
        assert_eq!(parsed["batch"], json!(50));
        assert_eq!(parsed["dry"], json!(true));
        assert_eq!(parsed["url"], json!("http://x?a=b"));
    }

    #[test]
    fn test_parse_params_invalid() {
        let params = vec!["invalid_format".to_string()];
        assert!(Args::parse_params(&params).is_err());
    }

    #[test]
    fn test_run_command_parses() {
        let args = Args::try_parse_from([
            "cadence", "run", "nightly", "-p", "day=mon", "--max-concurrent-tasks", "2",
        ])
        .unwrap();

        assert_eq!(args.max_concurrent_tasks, Some(2));
        match args.command {
            Commands::Run {
                workflow_id,
                params,
                ..
            } => {
                assert_eq!(workflow_id, "nightly");
                assert_eq!(params, vec!["day=mon"]);
            }
            _ => panic!("expected run command"),
        }
    }
}
