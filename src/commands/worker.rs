//! Process-mode worker entry point.

use filemgr_core::error::AppError;
use filemgr_tasks::{host, jobs};

/// Serve JSON-lines task requests on stdin until the scheduler closes it.
pub async fn execute() -> Result<(), AppError> {
    tracing::debug!("Worker process {} started", std::process::id());

    // The host loop blocks on its inbound channel.
    tokio::task::spawn_blocking(|| host::run_stdio(&jobs::default_executor()))
        .await
        .map_err(|e| AppError::worker(format!("Worker host stopped abnormally: {e}")))??;

    tracing::debug!("Worker process {} exiting", std::process::id());
    Ok(())
}
