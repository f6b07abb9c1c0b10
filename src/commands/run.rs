//! One-shot task execution.

use std::sync::Arc;

use clap::Args;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use filemgr_core::config::AppConfig;
use filemgr_core::error::AppError;
use filemgr_tasks::{TaskManager, TaskType, jobs};

/// Arguments for `run`
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Task type, e.g. `calculate_folder_size`
    #[arg(short = 't', long = "type")]
    pub task_type: TaskType,

    /// JSON payload handed to the handler
    #[arg(short, long, default_value = "{}")]
    pub payload: String,

    /// Operation id; Ctrl-C cancels the operation
    #[arg(short, long)]
    pub operation: Option<String>,

    /// Override the configured pool size
    #[arg(long)]
    pub pool_size: Option<usize>,
}

/// Submit the task, stream its progress to stdout, then print the result.
pub async fn execute(args: &RunArgs, config: &AppConfig) -> Result<(), AppError> {
    let payload: Value = serde_json::from_str(&args.payload)
        .map_err(|e| AppError::validation(format!("Payload is not valid JSON: {e}")))?;

    let mut worker_config = config.worker.clone();
    if args.pool_size.is_some() {
        worker_config.pool_size = args.pool_size;
    }

    let manager = TaskManager::from_config(&worker_config, Arc::new(jobs::default_executor()))?;
    tracing::info!(
        "Running {} on a pool of {} {:?} workers",
        args.task_type,
        manager.pool_size(),
        worker_config.mode
    );

    let mut progress = manager.subscribe_progress();
    let printer = tokio::spawn(async move {
        loop {
            match progress.recv().await {
                Ok(update) => println!("progress: {}", update.data),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} progress updates", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let task = manager.submit(args.task_type, payload, args.operation.clone());
    tokio::pin!(task);

    let outcome = tokio::select! {
        outcome = &mut task => outcome,
        _ = tokio::signal::ctrl_c(), if args.operation.is_some() => {
            if let Some(op) = &args.operation {
                let cancelled = manager.cancel(op.as_str()).await;
                tracing::info!(
                    "Interrupted: cancelled '{}' ({} queued, {} running)",
                    op,
                    cancelled.removed_from_queue,
                    cancelled.signalled_workers
                );
            }
            task.await
        }
    };

    manager.shutdown().await;
    printer.abort();

    let data = outcome?;
    let rendered = serde_json::to_string_pretty(&data)?;
    println!("{rendered}");
    Ok(())
}
