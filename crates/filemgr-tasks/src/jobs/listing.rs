//! Single-directory listing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::{HandlerError, TaskContext, TaskHandler};
use crate::protocol::{TaskRequest, TaskType};

use super::parse_payload;

#[derive(Debug, Deserialize)]
struct ListPayload {
    path: PathBuf,
    #[serde(default)]
    include_hidden: bool,
}

#[derive(Debug, Serialize)]
struct Entry {
    name: String,
    is_dir: bool,
    is_symlink: bool,
    size: u64,
    modified: Option<u64>,
}

/// Lists one directory, directories first, then by name.
#[derive(Debug)]
pub struct ListDirectoryHandler;

impl TaskHandler for ListDirectoryHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ListDirectory
    }

    fn execute(
        &self,
        request: &TaskRequest,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        let payload: ListPayload = parse_payload(&request.payload)?;
        let mut entries = Vec::new();

        for entry in std::fs::read_dir(&payload.path)? {
            ctx.check_cancelled()?;
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !payload.include_hidden && name.starts_with('.') {
                continue;
            }

            let file_type = entry.file_type()?;
            // Symlink targets may be dangling; fall back to the link itself.
            let metadata = match std::fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(_) => entry.metadata()?,
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs());

            entries.push(Entry {
                name,
                is_dir: metadata.is_dir(),
                is_symlink: file_type.is_symlink(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified,
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        Ok(serde_json::json!({
            "path": payload.path.display().to_string(),
            "entries": serde_json::to_value(&entries)
                .map_err(|e| HandlerError::Failed(e.to_string()))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::executor::testing::run_handler;

    fn request(payload: Value) -> TaskRequest {
        TaskRequest {
            id: "ls-1".to_string(),
            task_type: TaskType::ListDirectory,
            payload,
            operation_id: None,
        }
    }

    #[test]
    fn test_lists_directories_first_and_hides_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();
        std::fs::create_dir(dir.path().join("zdir")).unwrap();

        let (result, _) = run_handler(
            &ListDirectoryHandler,
            &request(json!({"path": dir.path()})),
            false,
        );
        let data = result.unwrap();
        let names: Vec<&str> = data["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["zdir", "b.txt"]);
        assert_eq!(data["entries"][1]["size"], 2);
    }

    #[test]
    fn test_include_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();

        let (result, _) = run_handler(
            &ListDirectoryHandler,
            &request(json!({"path": dir.path(), "include_hidden": true})),
            false,
        );
        assert_eq!(result.unwrap()["entries"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_path() {
        let (result, _) = run_handler(
            &ListDirectoryHandler,
            &request(json!({})),
            false,
        );
        assert!(matches!(result, Err(HandlerError::InvalidPayload(_))));
    }
}
