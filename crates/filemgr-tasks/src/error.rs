//! Errors delivered to callers of [`TaskManager::submit`](crate::TaskManager::submit).

use filemgr_core::error::AppError;

/// Why a submitted task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The worker ran the task and reported `success: false`.
    #[error("{0}")]
    Failed(String),

    /// The worker running the task crashed or exited.
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    /// The queue already held its maximum number of tasks.
    #[error("Task queue is full ({limit} pending tasks)")]
    QueueFull {
        /// Configured queue bound.
        limit: usize,
    },

    /// The task was removed from the queue by `cancel` before it started.
    #[error("Operation cancelled")]
    Cancelled,

    /// The scheduler shut down before the task settled.
    #[error("Task manager is shutting down")]
    ShuttingDown,
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        match &err {
            TaskError::QueueFull { .. } | TaskError::ShuttingDown => {
                AppError::service_unavailable(err.to_string())
            }
            TaskError::WorkerCrashed(_) => AppError::worker(err.to_string()),
            TaskError::Failed(_) | TaskError::Cancelled => AppError::task(err.to_string()),
        }
    }
}
