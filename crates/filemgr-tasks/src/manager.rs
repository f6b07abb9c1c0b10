//! Task manager: the public scheduling handle and its dispatcher loop.
//!
//! All scheduling state (queue, pending results, operation index, pool) is
//! owned by a single dispatcher task. [`TaskManager`] handles talk to it over
//! a command channel and each submission gets its own oneshot completion
//! channel, so nothing is shared and nothing needs a lock.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use filemgr_core::config::worker::WorkerPoolConfig;
use filemgr_core::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing;
use uuid::Uuid;

use crate::error::TaskError;
use crate::executor::TaskExecutor;
use crate::pool::{self, SlotStats, WorkerPool};
use crate::protocol::{
    ManagerMessage, TaskProgress, TaskRequest, TaskResult, TaskType, WorkerMessage,
};
use crate::queue::TaskQueue;
use crate::worker::{self, WorkerEvent, WorkerEventKind, WorkerFactory};

type Reply = oneshot::Sender<Result<Value, TaskError>>;

/// Outcome of [`TaskManager::cancel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    /// Queued tasks removed and rejected with [`TaskError::Cancelled`].
    pub removed_from_queue: usize,
    /// Running workers sent an advisory cancel message.
    pub signalled_workers: usize,
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of slots.
    pub pool_size: usize,
    /// Slots currently running a task.
    pub busy: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Queue bound.
    pub max_queue_length: usize,
    /// Submitted tasks not yet settled.
    pub pending: usize,
    /// Whether shutdown has begun.
    pub shutting_down: bool,
    /// Per-slot detail.
    pub slots: Vec<SlotStats>,
}

enum Command {
    Submit {
        task_type: TaskType,
        payload: Value,
        operation_id: Option<String>,
        reply: Reply,
    },
    Cancel {
        operation_id: String,
        reply: oneshot::Sender<CancelOutcome>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running scheduler.
#[derive(Debug, Clone)]
pub struct TaskManager {
    commands: mpsc::UnboundedSender<Command>,
    progress: broadcast::Sender<TaskProgress>,
    pool_size: usize,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit { task_type, .. } => write!(f, "Submit({task_type})"),
            Self::Cancel { operation_id, .. } => write!(f, "Cancel({operation_id})"),
            Self::Stats { .. } => f.write_str("Stats"),
            Self::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl TaskManager {
    /// Start a scheduler from configuration, sizing the pool for this host
    /// when no explicit size is configured. Must be called inside a Tokio
    /// runtime.
    pub fn from_config(
        config: &WorkerPoolConfig,
        executor: Arc<TaskExecutor>,
    ) -> Result<Self, AppError> {
        let factory = worker::factory_from_config(config, executor)?;
        let pool_size = pool::default_pool_size(config);
        Self::start(pool_size, config.max_queue_length, config.progress_buffer, factory)
    }

    /// Start a scheduler with `pool_size` workers from `factory`.
    pub fn start(
        pool_size: usize,
        max_queue_length: usize,
        progress_buffer: usize,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<Self, AppError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (progress, _) = broadcast::channel(progress_buffer.max(1));

        let pool = WorkerPool::new(pool_size, factory, events_tx)?;
        let pool_size = pool.size();

        let dispatcher = Dispatcher {
            pool,
            queue: TaskQueue::new(max_queue_length),
            pending: HashMap::new(),
            operations: HashMap::new(),
            progress: progress.clone(),
            next_seq: 0,
            shutting_down: false,
        };
        tokio::spawn(dispatcher.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            progress,
            pool_size,
        })
    }

    /// Number of worker slots.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Submit a task.
    ///
    /// The task is registered immediately, in call order; the returned
    /// future resolves once the task settles. Every submission settles
    /// exactly once, including across worker crashes and shutdown.
    pub fn submit(
        &self,
        task_type: TaskType,
        payload: Value,
        operation_id: Option<String>,
    ) -> impl Future<Output = Result<Value, TaskError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .commands
            .send(Command::Submit {
                task_type,
                payload,
                operation_id,
                reply,
            })
            .is_ok();

        async move {
            if !sent {
                return Err(TaskError::ShuttingDown);
            }
            rx.await.unwrap_or(Err(TaskError::ShuttingDown))
        }
    }

    /// Cancel an operation.
    ///
    /// Queued tasks of the operation are removed and rejected with
    /// [`TaskError::Cancelled`]. Running tasks are only sent an advisory
    /// cancel message; their futures settle when the worker answers.
    pub async fn cancel(&self, operation_id: impl Into<String>) -> CancelOutcome {
        let (reply, rx) = oneshot::channel();
        let command = Command::Cancel {
            operation_id: operation_id.into(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return CancelOutcome::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of the scheduler state.
    pub async fn stats(&self) -> Result<PoolStats, AppError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| AppError::service_unavailable("Task manager has stopped"))?;
        rx.await
            .map_err(|_| AppError::service_unavailable("Task manager has stopped"))
    }

    /// Subscribe to progress events from every worker.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<TaskProgress> {
        self.progress.subscribe()
    }

    /// Reject all outstanding work and terminate every worker.
    ///
    /// Resolves once all workers have been terminated. Calling it again is
    /// a no-op.
    ///
    /// Termination is best-effort for thread workers: a thread that is busy
    /// has its channel closed and is detached, so a handler that never polls
    /// [`TaskContext::is_cancelled`](crate::TaskContext::is_cancelled) keeps
    /// running after this returns. Process workers are killed.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct PendingEntry {
    reply: Reply,
    operation_id: Option<String>,
}

struct Dispatcher {
    pool: WorkerPool,
    queue: TaskQueue,
    /// Completion handle per outstanding task id.
    pending: HashMap<String, PendingEntry>,
    /// Slots currently running each operation.
    operations: HashMap<String, BTreeSet<usize>>,
    progress: broadcast::Sender<TaskProgress>,
    next_seq: u64,
    shutting_down: bool,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit {
                        task_type,
                        payload,
                        operation_id,
                        reply,
                    }) => self.submit(task_type, payload, operation_id, reply),
                    Some(Command::Cancel {
                        operation_id,
                        reply,
                    }) => {
                        let _ = reply.send(self.cancel(&operation_id));
                    }
                    Some(Command::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                    }
                    None => {
                        tracing::debug!("All task manager handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
    }

    fn next_task_id(&mut self) -> String {
        self.next_seq += 1;
        format!("task-{}-{}", self.next_seq, Uuid::new_v4().simple())
    }

    fn submit(
        &mut self,
        task_type: TaskType,
        payload: Value,
        operation_id: Option<String>,
        reply: Reply,
    ) {
        if self.shutting_down {
            let _ = reply.send(Err(TaskError::ShuttingDown));
            return;
        }

        let id = self.next_task_id();
        self.pending.insert(
            id.clone(),
            PendingEntry {
                reply,
                operation_id: operation_id.clone(),
            },
        );

        let request = TaskRequest {
            id: id.clone(),
            task_type,
            payload,
            operation_id,
        };
        if let Err(e) = self.queue.enqueue(request) {
            tracing::warn!(
                "Rejecting task {} ({}): queue holds {} tasks",
                id,
                task_type,
                self.queue.len()
            );
            self.settle(&id, Err(e));
            return;
        }

        self.drain();
    }

    /// Hand queued tasks to idle slots, head first.
    fn drain(&mut self) {
        if self.shutting_down {
            return;
        }
        if self.pool.next_idle().is_none() && !self.queue.is_empty() {
            self.pool.revive();
        }

        while !self.queue.is_empty() {
            let Some(index) = self.pool.next_idle() else {
                break;
            };
            let Some(task) = self.queue.dequeue() else {
                break;
            };
            self.dispatch(index, task);
        }
    }

    fn dispatch(&mut self, index: usize, task: TaskRequest) {
        let task_id = task.id.clone();
        if let Some(op) = &task.operation_id {
            self.operations.entry(op.clone()).or_default().insert(index);
        }

        tracing::debug!(
            "Dispatching task {} ({}) to slot {}",
            task_id,
            task.task_type,
            index
        );

        if let Err(e) = self.pool.assign(index, task) {
            tracing::error!("Failed to send task {} to slot {}: {}", task_id, index, e);
            self.recover_slot(index, e.message);
        }
    }

    fn cancel(&mut self, operation_id: &str) -> CancelOutcome {
        let mut outcome = CancelOutcome::default();
        if self.shutting_down {
            return outcome;
        }

        for task in self.queue.remove_operation(operation_id) {
            self.settle(&task.id, Err(TaskError::Cancelled));
            outcome.removed_from_queue += 1;
        }

        let slots: Vec<usize> = self
            .operations
            .get(operation_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for index in slots {
            let message = ManagerMessage::Cancel {
                operation_id: operation_id.to_string(),
            };
            match self.pool.post(index, message) {
                Ok(()) => outcome.signalled_workers += 1,
                Err(e) => tracing::warn!(
                    "Failed to signal cancel for '{}' to slot {}: {}",
                    operation_id,
                    index,
                    e
                ),
            }
        }

        tracing::info!(
            "Cancelled operation '{}': {} queued removed, {} workers signalled",
            operation_id,
            outcome.removed_from_queue,
            outcome.signalled_workers
        );
        outcome
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        if self.shutting_down {
            tracing::trace!("Ignoring event from slot {} during shutdown", event.slot);
            return;
        }
        if !self.pool.is_current(event.slot, event.generation) {
            tracing::debug!(
                "Ignoring event from replaced worker (slot {}, generation {})",
                event.slot,
                event.generation
            );
            return;
        }

        match event.kind {
            WorkerEventKind::Message(WorkerMessage::Progress(progress)) => {
                // No subscribers is fine.
                let _ = self.progress.send(progress);
            }
            WorkerEventKind::Message(WorkerMessage::Result(result)) => {
                self.on_result(event.slot, result);
            }
            WorkerEventKind::Error(cause) => {
                tracing::warn!("Worker in slot {} failed: {}", event.slot, cause);
                self.on_worker_failure(event.slot, cause);
            }
            WorkerEventKind::Exit(code) => {
                let cause = match code {
                    Some(0) => "Worker exited unexpectedly".to_string(),
                    Some(code) => format!("Worker exited with code {code}"),
                    None => "Worker was killed".to_string(),
                };
                tracing::warn!("Worker in slot {} stopped: {}", event.slot, cause);
                self.on_worker_failure(event.slot, cause);
            }
        }
    }

    fn on_result(&mut self, index: usize, result: TaskResult) {
        // Only the slot running a task may settle it.
        let Some(assignment) = self.pool.complete(index, &result.id) else {
            tracing::warn!(
                "Dropping result from slot {} for task {} it was not running",
                index,
                result.id
            );
            return;
        };
        self.unlink_operation(assignment.operation_id.as_deref(), index);

        let outcome = if result.success {
            Ok(result.data.unwrap_or(Value::Null))
        } else {
            Err(TaskError::Failed(
                result.error.unwrap_or_else(|| "Task failed".to_string()),
            ))
        };
        self.settle(&result.id, outcome);
        self.drain();
    }

    fn on_worker_failure(&mut self, index: usize, cause: String) {
        self.recover_slot(index, cause);
        self.drain();
    }

    /// Reject the slot's in-flight task and swap in a new worker.
    fn recover_slot(&mut self, index: usize, cause: String) {
        if let Some(assignment) = self.pool.release(index) {
            self.unlink_operation(assignment.operation_id.as_deref(), index);
            self.settle(&assignment.task_id, Err(TaskError::WorkerCrashed(cause)));
        }

        if let Some(mut old) = self.pool.replace(index) {
            tokio::spawn(async move {
                if let Err(e) = old.terminate().await {
                    tracing::warn!("Failed to terminate crashed worker in slot {}: {}", index, e);
                }
            });
        }
        tracing::info!("Worker slot {} replaced", index);
    }

    fn unlink_operation(&mut self, operation_id: Option<&str>, index: usize) {
        let Some(op) = operation_id else {
            return;
        };
        if let Some(slots) = self.operations.get_mut(op) {
            slots.remove(&index);
            if slots.is_empty() {
                self.operations.remove(op);
            }
        }
    }

    fn settle(&mut self, task_id: &str, outcome: Result<Value, TaskError>) {
        match self.pending.remove(task_id) {
            Some(entry) => {
                if let Err(e) = &outcome {
                    tracing::debug!(
                        "Task {} (operation {:?}) rejected: {}",
                        task_id,
                        entry.operation_id,
                        e
                    );
                }
                // The caller may have dropped its future.
                let _ = entry.reply.send(outcome);
            }
            None => tracing::warn!("No pending entry for task {}", task_id),
        }
    }

    async fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        tracing::info!(
            "Shutting down task manager: {} pending, {} queued",
            self.pending.len(),
            self.queue.len()
        );

        self.queue.drain_all();
        self.operations.clear();
        self.pool.clear_assignments();
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(TaskError::ShuttingDown));
        }

        self.pool.terminate_all().await;
    }

    fn stats(&self) -> PoolStats {
        let queue = self.queue.stats();
        PoolStats {
            pool_size: self.pool.size(),
            busy: self.pool.busy_count(),
            queued: queue.queued,
            max_queue_length: queue.max_len,
            pending: self.pending.len(),
            shutting_down: self.shutting_down,
            slots: self.pool.stats(),
        }
    }
}
