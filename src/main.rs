//! filemgr-taskd, the background task runner for the FileMgr desktop client.
//!
//! Runs tasks through the worker pool from the command line and doubles as
//! the entry point of process-mode workers (`filemgr-taskd worker`).

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use filemgr_core::config::AppConfig;
use filemgr_core::AppResult;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = cli.execute(config).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from an explicit file, or from `config/` plus the
/// environment.
fn load_configuration(cli: &Cli) -> AppResult<AppConfig> {
    match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(&cli.env),
    }
}

/// Initialize tracing/logging.
///
/// Logs always go to stderr: stdout carries command output, and in a
/// worker process it is the protocol channel.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
