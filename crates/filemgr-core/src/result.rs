//! Convenience result type alias for FileMgr.

use crate::error::AppError;

/// A specialized `Result` type for FileMgr operations.
pub type AppResult<T> = Result<T, AppError>;
