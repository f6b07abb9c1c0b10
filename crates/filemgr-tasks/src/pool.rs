//! Fixed-size pool of worker slots.
//!
//! Slot indices are stable for the lifetime of the pool. A crashed worker is
//! swapped out in place: the slot's generation is bumped so events still in
//! flight from the old worker can be recognised and dropped.

use std::sync::Arc;

use filemgr_core::config::worker::WorkerPoolConfig;
use filemgr_core::error::AppError;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio::sync::mpsc::UnboundedSender;
use tracing;

use crate::protocol::{ManagerMessage, TaskRequest};
use crate::worker::{Worker, WorkerEvent, WorkerEvents, WorkerFactory};

/// CPU count and total memory (bytes) of the host.
pub fn system_resources() -> (usize, u64) {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let system = System::new_with_specifics(
        RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
    );
    (cpus, system.total_memory())
}

/// Pool size for this host according to `config`.
pub fn default_pool_size(config: &WorkerPoolConfig) -> usize {
    let (cpus, total_memory) = system_resources();
    let size = config.resolve_pool_size(cpus, total_memory);
    tracing::debug!(
        "Resolved pool size {} (cpus={}, total_memory={} MiB, explicit={:?})",
        size,
        cpus,
        total_memory / (1024 * 1024),
        config.pool_size
    );
    size
}

/// The task a busy slot is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Task identifier.
    pub task_id: String,
    /// Operation the task belongs to.
    pub operation_id: Option<String>,
}

/// One pool position.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    /// `None` only while a replacement could not be spawned.
    worker: Option<Box<dyn Worker>>,
    generation: u64,
    assignment: Option<Assignment>,
    tasks_completed: u64,
    restarts: u64,
}

impl WorkerSlot {
    fn new(index: usize) -> Self {
        Self {
            index,
            worker: None,
            generation: 0,
            assignment: None,
            tasks_completed: 0,
            restarts: 0,
        }
    }

    /// A slot is busy iff it has a current task.
    pub fn is_busy(&self) -> bool {
        self.assignment.is_some()
    }

    /// Whether the slot can accept a task right now.
    pub fn is_idle(&self) -> bool {
        self.worker.is_some() && !self.is_busy()
    }

    /// Task currently assigned to this slot.
    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    fn stats(&self) -> SlotStats {
        SlotStats {
            index: self.index,
            busy: self.is_busy(),
            alive: self.worker.is_some(),
            current_task_id: self.assignment.as_ref().map(|a| a.task_id.clone()),
            tasks_completed: self.tasks_completed,
            restarts: self.restarts,
        }
    }
}

/// Per-slot statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStats {
    /// Slot index
    pub index: usize,
    /// Whether a task is running
    pub busy: bool,
    /// Whether a live worker occupies the slot
    pub alive: bool,
    /// Running task, if any
    pub current_task_id: Option<String>,
    /// Results delivered by this slot
    pub tasks_completed: u64,
    /// Number of worker replacements
    pub restarts: u64,
}

/// Array of worker slots plus the factory used to refill them.
#[derive(Debug)]
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    factory: Arc<dyn WorkerFactory>,
    events: UnboundedSender<WorkerEvent>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(
        size: usize,
        factory: Arc<dyn WorkerFactory>,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Self, AppError> {
        let size = size.max(1);
        let mut pool = Self {
            slots: (0..size).map(WorkerSlot::new).collect(),
            factory,
            events,
        };
        for index in 0..size {
            pool.spawn_into(index)?;
        }
        tracing::info!("Worker pool started with {} slots", size);
        Ok(pool)
    }

    fn spawn_into(&mut self, index: usize) -> Result<(), AppError> {
        let slot = &mut self.slots[index];
        slot.generation += 1;
        let events = WorkerEvents::new(index, slot.generation, self.events.clone());
        slot.worker = Some(self.factory.spawn(events)?);
        Ok(())
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots running a task.
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_busy()).count()
    }

    /// Borrow a slot.
    pub fn slot(&self, index: usize) -> Option<&WorkerSlot> {
        self.slots.get(index)
    }

    /// Whether an event stamped `(index, generation)` comes from the worker
    /// currently occupying the slot.
    pub fn is_current(&self, index: usize, generation: u64) -> bool {
        self.slots
            .get(index)
            .is_some_and(|s| s.generation == generation && s.worker.is_some())
    }

    /// Lowest-index idle slot.
    pub fn next_idle(&self) -> Option<usize> {
        self.slots.iter().position(WorkerSlot::is_idle)
    }

    /// Mark the slot busy with `task` and post it to the worker.
    ///
    /// On a post failure the slot stays assigned so the caller can run
    /// failure recovery against it.
    pub fn assign(&mut self, index: usize, task: TaskRequest) -> Result<(), AppError> {
        let slot = &mut self.slots[index];
        slot.assignment = Some(Assignment {
            task_id: task.id.clone(),
            operation_id: task.operation_id.clone(),
        });
        let worker = slot
            .worker
            .as_mut()
            .ok_or_else(|| AppError::worker(format!("Worker slot {index} has no live worker")))?;
        worker.post(ManagerMessage::Task(task))
    }

    /// Free the slot if it is running `task_id`.
    pub fn complete(&mut self, index: usize, task_id: &str) -> Option<Assignment> {
        let slot = self.slots.get_mut(index)?;
        if slot.assignment.as_ref().is_some_and(|a| a.task_id == task_id) {
            slot.tasks_completed += 1;
            slot.assignment.take()
        } else {
            None
        }
    }

    /// Free the slot regardless of what it was running.
    pub fn release(&mut self, index: usize) -> Option<Assignment> {
        self.slots.get_mut(index)?.assignment.take()
    }

    /// Post a control message to the worker in `index`.
    pub fn post(&mut self, index: usize, message: ManagerMessage) -> Result<(), AppError> {
        self.slots
            .get_mut(index)
            .and_then(|s| s.worker.as_mut())
            .ok_or_else(|| AppError::worker(format!("Worker slot {index} has no live worker")))?
            .post(message)
    }

    /// Swap a fresh worker into `index` and hand back the old one for
    /// termination. The slot count never changes; if spawning fails the slot
    /// is left empty and retried by [`revive`](Self::revive).
    pub fn replace(&mut self, index: usize) -> Option<Box<dyn Worker>> {
        let old = self.slots[index].worker.take();
        self.slots[index].restarts += 1;
        if let Err(e) = self.spawn_into(index) {
            tracing::error!("Failed to spawn replacement worker for slot {}: {}", index, e);
        }
        old
    }

    /// Retry spawning workers for slots left empty by a failed replacement.
    pub fn revive(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].worker.is_none() {
                match self.spawn_into(index) {
                    Ok(()) => tracing::info!("Worker slot {} revived", index),
                    Err(e) => tracing::error!("Worker slot {} still unavailable: {}", index, e),
                }
            }
        }
    }

    /// Drop every assignment (used on shutdown).
    pub fn clear_assignments(&mut self) {
        for slot in &mut self.slots {
            slot.assignment = None;
        }
    }

    /// Terminate every worker concurrently, logging failures.
    pub async fn terminate_all(&mut self) {
        let terminations = self.slots.iter_mut().filter_map(|slot| {
            let index = slot.index;
            slot.worker.take().map(|mut worker| async move {
                if let Err(e) = worker.terminate().await {
                    tracing::warn!("Failed to terminate worker in slot {}: {}", index, e);
                }
            })
        });
        join_all(terminations).await;
        tracing::info!("All {} workers terminated", self.slots.len());
    }

    /// Per-slot statistics.
    pub fn stats(&self) -> Vec<SlotStats> {
        self.slots.iter().map(WorkerSlot::stats).collect()
    }
}
