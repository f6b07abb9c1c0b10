//! Built-in task handler implementations.

pub mod checksum;
pub mod folder_size;
pub mod listing;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::executor::{HandlerError, TaskExecutor};

pub use checksum::ChecksumHandler;
pub use folder_size::FolderSizeHandler;
pub use listing::ListDirectoryHandler;

/// Executor with every built-in handler registered.
pub fn default_executor() -> TaskExecutor {
    TaskExecutor::new()
        .with_handler(Arc::new(FolderSizeHandler::default()))
        .with_handler(Arc::new(ChecksumHandler::default()))
        .with_handler(Arc::new(ListDirectoryHandler))
}

/// Deserialize a request payload into a handler's input type.
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload.clone()).map_err(|e| HandlerError::InvalidPayload(e.to_string()))
}
