//! Configuration inspection commands.

use clap::{Args, Subcommand};

use filemgr_core::config::AppConfig;
use filemgr_core::error::AppError;
use filemgr_tasks::pool;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as JSON
    Show,
    /// Check the configuration and print the resolved pool layout
    Validate,
}

/// Execute config commands
pub fn execute(args: &ConfigArgs, config: &AppConfig) -> Result<(), AppError> {
    match args.command {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommand::Validate => {
            let worker = &config.worker;
            if worker.max_queue_length == 0 {
                return Err(AppError::validation(
                    "worker.max_queue_length must be at least 1",
                ));
            }
            if worker.pool_size == Some(0) {
                return Err(AppError::validation("worker.pool_size must be at least 1"));
            }

            let (cpus, total_memory) = pool::system_resources();
            println!("Configuration is valid");
            println!("  Mode: {:?}", worker.mode);
            println!(
                "  Pool size: {} (cpus={}, memory={} MiB)",
                pool::default_pool_size(worker),
                cpus,
                total_memory / (1024 * 1024)
            );
            println!("  Queue limit: {}", worker.max_queue_length);
            println!("  Log level: {} ({})", config.logging.level, config.logging.format);
        }
    }

    Ok(())
}
