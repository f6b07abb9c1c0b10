//! Background worker pool configuration.

use serde::{Deserialize, Serialize};

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// How each pool slot isolates its worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// A dedicated OS thread owning its own handler state.
    #[default]
    Thread,
    /// A child process speaking JSON lines over stdin/stdout.
    Process,
}

/// One step of the memory-tiered pool size cap.
///
/// Hosts with less than `max_total_gb` of RAM get at most `cap` workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTier {
    /// Exclusive upper bound of total system memory, in gigabytes.
    pub max_total_gb: u64,
    /// Maximum worker count for hosts in this tier.
    pub cap: usize,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Explicit pool size. When absent the size is derived from CPU count
    /// and the memory tiers.
    #[serde(default)]
    pub pool_size: Option<usize>,
    /// Maximum number of queued (not yet dispatched) tasks.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,
    /// Worker isolation mode.
    #[serde(default)]
    pub mode: WorkerMode,
    /// Executable used as the worker entry point in process mode.
    /// Defaults to the running executable.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Arguments passed to the worker entry point in process mode.
    #[serde(default = "default_entry_args")]
    pub entry_args: Vec<String>,
    /// Memory tiers, checked in ascending order of `max_total_gb`.
    #[serde(default = "default_memory_tiers")]
    pub memory_tiers: Vec<MemoryTier>,
    /// Cap applied when total memory exceeds every tier.
    #[serde(default = "default_max_cap")]
    pub max_cap: usize,
    /// Capacity of the progress broadcast channel.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            max_queue_length: default_max_queue_length(),
            mode: WorkerMode::default(),
            entry_point: None,
            entry_args: default_entry_args(),
            memory_tiers: default_memory_tiers(),
            max_cap: default_max_cap(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl WorkerPoolConfig {
    /// Worker cap for a host with `total_memory_bytes` of RAM.
    pub fn memory_cap(&self, total_memory_bytes: u64) -> usize {
        let mut tiers = self.memory_tiers.clone();
        tiers.sort_by_key(|t| t.max_total_gb);

        tiers
            .iter()
            .find(|t| total_memory_bytes < t.max_total_gb.saturating_mul(BYTES_PER_GB))
            .map(|t| t.cap)
            .unwrap_or(self.max_cap)
    }

    /// Resolve the pool size: the explicit value if set, otherwise
    /// `min(cpu_count, memory_cap)`. Never returns zero.
    pub fn resolve_pool_size(&self, cpu_count: usize, total_memory_bytes: u64) -> usize {
        match self.pool_size {
            Some(n) => n.max(1),
            None => cpu_count.min(self.memory_cap(total_memory_bytes)).max(1),
        }
    }
}

fn default_max_queue_length() -> usize {
    1000
}

fn default_entry_args() -> Vec<String> {
    vec!["worker".to_string()]
}

fn default_memory_tiers() -> Vec<MemoryTier> {
    vec![
        MemoryTier {
            max_total_gb: 4,
            cap: 2,
        },
        MemoryTier {
            max_total_gb: 8,
            cap: 4,
        },
        MemoryTier {
            max_total_gb: 16,
            cap: 6,
        },
    ]
}

fn default_max_cap() -> usize {
    8
}

fn default_progress_buffer() -> usize {
    256
}
