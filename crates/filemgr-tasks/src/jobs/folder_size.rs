//! Recursive folder size aggregation.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing;
use walkdir::WalkDir;

use crate::executor::{HandlerError, TaskContext, TaskHandler};
use crate::protocol::{TaskRequest, TaskType};

use super::parse_payload;

#[derive(Debug, Deserialize)]
struct FolderSizePayload {
    path: PathBuf,
}

/// Sums file sizes below a directory without following symlinks.
/// Entries that cannot be read are counted as skipped.
#[derive(Debug)]
pub struct FolderSizeHandler {
    /// Emit progress after this many files.
    progress_every: u64,
}

impl Default for FolderSizeHandler {
    fn default() -> Self {
        Self {
            progress_every: 500,
        }
    }
}

impl FolderSizeHandler {
    /// Handler reporting progress every `progress_every` files.
    pub fn with_progress_every(progress_every: u64) -> Self {
        Self {
            progress_every: progress_every.max(1),
        }
    }
}

impl TaskHandler for FolderSizeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::CalculateFolderSize
    }

    fn execute(
        &self,
        request: &TaskRequest,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        let payload: FolderSizePayload = parse_payload(&request.payload)?;
        if !payload.path.is_dir() {
            return Err(HandlerError::InvalidPayload(format!(
                "'{}' is not a directory",
                payload.path.display()
            )));
        }

        let mut total_bytes: u64 = 0;
        let mut files: u64 = 0;
        let mut directories: u64 = 0;
        let mut skipped: u64 = 0;

        for entry in WalkDir::new(&payload.path).follow_links(false) {
            ctx.check_cancelled()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                directories += 1;
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => total_bytes += metadata.len(),
                    Err(e) => {
                        tracing::debug!("No metadata for {}: {}", entry.path().display(), e);
                        skipped += 1;
                        continue;
                    }
                }
                files += 1;
                if files % self.progress_every == 0 {
                    ctx.progress(json!({"files": files, "bytes": total_bytes}));
                }
            }
        }

        Ok(json!({
            "path": payload.path.display().to_string(),
            "total_bytes": total_bytes,
            "files": files,
            "directories": directories,
            "skipped": skipped,
        }))
    }
}
