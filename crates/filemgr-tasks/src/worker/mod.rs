//! Worker handles owned by the pool.
//!
//! A worker shares no mutable state with the scheduler. The scheduler posts
//! [`ManagerMessage`]s into it, and the worker reports back through its
//! [`WorkerEvents`] handle, which stamps every event with the slot index and
//! slot generation it was spawned for.

pub mod process;
pub mod thread;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use filemgr_core::config::worker::{WorkerMode, WorkerPoolConfig};
use filemgr_core::error::AppError;
use tokio::sync::mpsc::UnboundedSender;

use crate::executor::TaskExecutor;
use crate::host::MessageSink;
use crate::protocol::{ManagerMessage, WorkerMessage};

pub use process::{ProcessWorker, ProcessWorkerFactory};
pub use thread::{ThreadWorker, ThreadWorkerFactory};

/// What a worker reported.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEventKind {
    /// A protocol message (result or progress).
    Message(WorkerMessage),
    /// An uncaught failure inside the worker.
    Error(String),
    /// The worker stopped. `None` means it was killed without an exit code.
    Exit(Option<i32>),
}

/// An event tagged with the slot it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    /// Pool slot index.
    pub slot: usize,
    /// Generation of the worker inside the slot when it was spawned.
    pub generation: u64,
    /// The event itself.
    pub kind: WorkerEventKind,
}

/// Sending half handed to a freshly spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerEvents {
    slot: usize,
    generation: u64,
    tx: UnboundedSender<WorkerEvent>,
}

impl WorkerEvents {
    /// Create an event handle for `slot` at `generation`.
    pub fn new(slot: usize, generation: u64, tx: UnboundedSender<WorkerEvent>) -> Self {
        Self {
            slot,
            generation,
            tx,
        }
    }

    /// Slot index this handle reports for.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Generation this handle reports for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn emit(&self, kind: WorkerEventKind) -> bool {
        self.tx
            .send(WorkerEvent {
                slot: self.slot,
                generation: self.generation,
                kind,
            })
            .is_ok()
    }

    /// Report a protocol message. Returns `false` once the scheduler is gone.
    pub fn message(&self, message: WorkerMessage) -> bool {
        self.emit(WorkerEventKind::Message(message))
    }

    /// Report an uncaught worker failure.
    pub fn error(&self, cause: impl Into<String>) -> bool {
        self.emit(WorkerEventKind::Error(cause.into()))
    }

    /// Report that the worker stopped.
    pub fn exit(&self, code: Option<i32>) -> bool {
        self.emit(WorkerEventKind::Exit(code))
    }
}

impl MessageSink for WorkerEvents {
    fn send(&self, message: WorkerMessage) -> Result<(), AppError> {
        if self.message(message) {
            Ok(())
        } else {
            Err(AppError::worker("Scheduler is no longer receiving events"))
        }
    }
}

/// A live worker occupying one pool slot.
#[async_trait]
pub trait Worker: Send + std::fmt::Debug {
    /// Post a message to the worker without waiting.
    fn post(&mut self, message: ManagerMessage) -> Result<(), AppError>;

    /// Stop the worker. Called on shutdown and when a crashed worker is
    /// replaced; the caller logs and swallows any error.
    async fn terminate(&mut self) -> Result<(), AppError>;
}

/// Creates workers bound to a fixed task-handler entry point.
pub trait WorkerFactory: Send + Sync + std::fmt::Debug {
    /// Spawn a worker that reports through `events`.
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn Worker>, AppError>;
}

/// Build the factory selected by `config.mode`.
///
/// Thread workers run `executor` in-process. Process workers launch
/// `config.entry_point` (or the current executable) with `config.entry_args`.
pub fn factory_from_config(
    config: &WorkerPoolConfig,
    executor: Arc<TaskExecutor>,
) -> Result<Arc<dyn WorkerFactory>, AppError> {
    match config.mode {
        WorkerMode::Thread => Ok(Arc::new(ThreadWorkerFactory::new(executor))),
        WorkerMode::Process => {
            let program = match &config.entry_point {
                Some(path) => PathBuf::from(path),
                None => std::env::current_exe().map_err(|e| {
                    AppError::configuration(format!("Cannot resolve worker entry point: {e}"))
                })?,
            };
            Ok(Arc::new(ProcessWorkerFactory::new(
                program,
                config.entry_args.clone(),
            )))
        }
    }
}
