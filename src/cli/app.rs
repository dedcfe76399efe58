// ABOUTME: Main application orchestration for the cadence CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands;
use super::{Args, Commands, Config};

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(!no_color)
            .with_target(false);

        let installed = match self.config.logging.format.as_str() {
            "compact" => builder.compact().try_init(),
            _ => builder.try_init(),
        };
        installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Apply flags that override the loaded configuration
    fn apply_overrides(&mut self, args: &Args) {
        if let Some(max_tasks) = args.max_concurrent_tasks {
            self.config.max_concurrent_tasks = max_tasks;
        }

        match &args.command {
            Commands::Serve {
                definitions: Some(dir),
            }
            | Commands::Run {
                definitions: Some(dir),
                ..
            }
            | Commands::List {
                definitions: Some(dir),
            } => self.config.definitions_dir = dir.clone(),
            _ => {}
        }
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting cadence v{}", env!("CARGO_PKG_VERSION"));
        debug!("Configuration loaded from: {:?}", args.config);

        self.apply_overrides(&args);

        match args.command {
            Commands::Serve { .. } => commands::serve(&self.config).await,

            Commands::Run {
                workflow_id,
                params,
                output,
                ..
            } => {
                let params = Args::parse_params(&params)?;
                commands::run_workflow(workflow_id, params, output, &self.config).await
            }

            Commands::Validate { path } => commands::validate(path).await,

            Commands::List { .. } => commands::list(&self.config).await,
        }
    }

    /// Create application and parsed arguments from the command line
    pub fn from_args() -> Result<(Self, Args)> {
        let args = Args::parse_args();
        let config = Config::load(args.config.clone())?;
        Ok((Self::new(config), args))
    }
}
