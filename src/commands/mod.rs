//! CLI command definitions and dispatch.

pub mod config;
pub mod run;
pub mod worker;

use clap::{Parser, Subcommand};

use filemgr_core::config::AppConfig;
use filemgr_core::error::AppError;

/// FileMgr background task runner
#[derive(Debug, Parser)]
#[command(name = "filemgr-taskd", version, about, long_about = None)]
pub struct Cli {
    /// Read configuration from this file only, ignoring `config/` and the environment
    #[arg(short, long)]
    pub config: Option<String>,

    /// Environment overlay loaded from `config/<env>`
    #[arg(short, long, default_value = "development")]
    pub env: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one task through the worker pool and print its result
    Run(run::RunArgs),
    /// Serve tasks over stdin/stdout (process-mode worker entry point)
    Worker,
    /// Configuration inspection
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Run(args) => run::execute(args, &config).await,
            Commands::Worker => worker::execute().await,
            Commands::Config(args) => config::execute(args, &config),
        }
    }
}
