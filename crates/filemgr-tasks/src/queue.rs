//! Bounded FIFO of tasks waiting for an idle worker.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing;

use crate::error::TaskError;
use crate::protocol::TaskRequest;

/// Task queue with a fixed maximum length.
///
/// Order is strict FIFO: no reordering by task type or operation.
#[derive(Debug)]
pub struct TaskQueue {
    items: VecDeque<TaskRequest>,
    max_len: usize,
}

impl TaskQueue {
    /// Create an empty queue holding at most `max_len` tasks.
    pub fn new(max_len: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_len,
        }
    }

    /// Append a task to the tail.
    ///
    /// Fails with [`TaskError::QueueFull`] when the queue already holds
    /// `max_len` tasks; queued tasks are left untouched.
    pub fn enqueue(&mut self, task: TaskRequest) -> Result<(), TaskError> {
        if self.is_full() {
            return Err(TaskError::QueueFull {
                limit: self.max_len,
            });
        }

        tracing::debug!(
            "Enqueued task: id={}, type='{}', operation={:?}, depth={}",
            task.id,
            task.task_type,
            task.operation_id,
            self.items.len() + 1
        );
        self.items.push_back(task);
        Ok(())
    }

    /// Pop the head of the queue.
    pub fn dequeue(&mut self) -> Option<TaskRequest> {
        self.items.pop_front()
    }

    /// Remove every queued task belonging to `operation_id`, preserving the
    /// order of the rest.
    pub fn remove_operation(&mut self, operation_id: &str) -> Vec<TaskRequest> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|t| t.operation_id.as_deref() == Some(operation_id));
        self.items = kept.into();
        removed
    }

    /// Remove and return every queued task.
    pub fn drain_all(&mut self) -> Vec<TaskRequest> {
        self.items.drain(..).collect()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether another enqueue would be rejected.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_len
    }

    /// Configured bound.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Snapshot of queue occupancy.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.items.len(),
            max_len: self.max_len,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of queued tasks
    pub queued: usize,
    /// Maximum queue length
    pub max_len: usize,
}
