//! Messages exchanged between the scheduler and its workers.
//!
//! Everything here is plain serde data so the same types travel over
//! in-process channels and over the JSON-lines pipe of a worker process.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The fixed set of operations a worker can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Recursively build a file-name index for a directory tree.
    BuildIndex,
    /// Search file names.
    SearchFiles,
    /// Search file contents by walking the tree.
    SearchContent,
    /// Search file contents using a previously built index.
    SearchContentIndexed,
    /// Aggregate the size of a folder.
    CalculateFolderSize,
    /// Compute a file checksum.
    CalculateChecksum,
    /// Load a persisted index.
    LoadIndex,
    /// Persist an index.
    SaveIndex,
    /// List a single directory.
    ListDirectory,
}

impl TaskType {
    /// Every task type, in declaration order.
    pub const ALL: [TaskType; 9] = [
        TaskType::BuildIndex,
        TaskType::SearchFiles,
        TaskType::SearchContent,
        TaskType::SearchContentIndexed,
        TaskType::CalculateFolderSize,
        TaskType::CalculateChecksum,
        TaskType::LoadIndex,
        TaskType::SaveIndex,
        TaskType::ListDirectory,
    ];

    /// Wire name of the task type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildIndex => "build_index",
            Self::SearchFiles => "search_files",
            Self::SearchContent => "search_content",
            Self::SearchContentIndexed => "search_content_indexed",
            Self::CalculateFolderSize => "calculate_folder_size",
            Self::CalculateChecksum => "calculate_checksum",
            Self::LoadIndex => "load_index",
            Self::SaveIndex => "save_index",
            Self::ListDirectory => "list_directory",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type '{s}'"))
    }
}

/// A unit of work sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique task identifier assigned by the scheduler.
    pub id: String,
    /// Which operation to run.
    pub task_type: TaskType,
    /// Opaque operation input.
    pub payload: Value,
    /// Caller-chosen operation grouping, used for progress and cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

/// Terminal outcome of a task, produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Identifier of the request this result settles.
    pub id: String,
    /// Whether the task succeeded.
    pub success: bool,
    /// Result data on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// A successful result carrying `data`.
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result carrying an error message.
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Informational progress emitted while a task runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// The task type reporting progress.
    pub task: TaskType,
    /// Operation the progress belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Opaque progress data.
    pub data: Value,
}

/// Scheduler → worker messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
    /// Run a task.
    Task(TaskRequest),
    /// Advisory request to abort the running task of an operation.
    Cancel {
        /// Operation to cancel.
        operation_id: String,
    },
}

/// Worker → scheduler messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The terminal result of a task.
    Result(TaskResult),
    /// A progress update.
    Progress(TaskProgress),
}
