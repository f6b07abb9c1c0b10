//! File checksum computation.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256, Sha512};

use crate::executor::{HandlerError, TaskContext, TaskHandler};
use crate::protocol::{TaskRequest, TaskType};

use super::parse_payload;

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Algorithm {
    #[default]
    Sha256,
    Sha512,
}

impl Algorithm {
    fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChecksumPayload {
    path: PathBuf,
    #[serde(default)]
    algorithm: Algorithm,
}

/// Streams a file through SHA-256 or SHA-512 and returns the hex digest.
#[derive(Debug)]
pub struct ChecksumHandler {
    /// Emit progress after this many bytes.
    progress_every: u64,
}

impl Default for ChecksumHandler {
    fn default() -> Self {
        Self {
            progress_every: 64 * CHUNK_SIZE as u64,
        }
    }
}

impl ChecksumHandler {
    /// Handler reporting progress every `progress_every` bytes.
    pub fn with_progress_every(progress_every: u64) -> Self {
        Self {
            progress_every: progress_every.max(1),
        }
    }

    fn digest<D: Digest>(
        &self,
        file: &mut File,
        total: u64,
        ctx: &mut TaskContext<'_>,
    ) -> Result<String, HandlerError> {
        let mut hasher = D::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut read_total: u64 = 0;
        let mut next_report = self.progress_every;

        loop {
            ctx.check_cancelled()?;
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            read_total += n as u64;
            if read_total >= next_report {
                ctx.progress(json!({"bytes_read": read_total, "total_bytes": total}));
                next_report = read_total + self.progress_every;
            }
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

impl TaskHandler for ChecksumHandler {
    fn task_type(&self) -> TaskType {
        TaskType::CalculateChecksum
    }

    fn execute(
        &self,
        request: &TaskRequest,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        let payload: ChecksumPayload = parse_payload(&request.payload)?;
        let mut file = File::open(&payload.path)?;
        let total = file.metadata()?.len();

        let checksum = match payload.algorithm {
            Algorithm::Sha256 => self.digest::<Sha256>(&mut file, total, ctx)?,
            Algorithm::Sha512 => self.digest::<Sha512>(&mut file, total, ctx)?,
        };

        Ok(json!({
            "path": payload.path.display().to_string(),
            "algorithm": payload.algorithm.name(),
            "checksum": checksum,
            "size": total,
        }))
    }
}
