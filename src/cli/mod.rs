use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};

pub mod config;
pub mod flow;
pub mod plugins;
pub mod run;
pub mod schema;

use feedflow::{app::AppError, registry::Registry};
use flow_plugin::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "feedflow",
    about = "Scheduled input, process and output pipelines",
    version
)]
pub struct Cli {
    /// Config file; searched for when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level or filter directives, overrides the config
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also log to a daily file under `<flow_data>/logs`
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Check a flow file against the registered plugins
    Validate { file: PathBuf },

    /// Write a commented sample config
    SampleConfig { path: Option<PathBuf> },

    /// Emit JSON-Schema for flow files and records
    Schema { dir: PathBuf },

    /// List plugins and their parameters
    Plugins,
}

pub struct CliContext {
    pub config_path: PathBuf,
    pub app: Arc<AppConfig>,
    pub registry: Registry,
}

pub async fn execute(context: &CliContext, command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Run => run::execute(context).await,
        Commands::Validate { file } => flow::validate(context, &file),
        Commands::Schema { dir } => schema::execute(&dir),
        Commands::Plugins => {
            plugins::execute(context);
            Ok(())
        }
        Commands::SampleConfig { path } => config::sample(path.as_deref()),
    }
}
