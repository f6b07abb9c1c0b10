//! Workers backed by a dedicated OS thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use filemgr_core::error::AppError;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing;

use crate::executor::TaskExecutor;
use crate::host;
use crate::protocol::ManagerMessage;

use super::{Worker, WorkerEvents, WorkerFactory};

/// Spawns one thread per worker, each running the host loop over the
/// shared, immutable handler registry.
#[derive(Debug, Clone)]
pub struct ThreadWorkerFactory {
    executor: Arc<TaskExecutor>,
}

impl ThreadWorkerFactory {
    /// Create a factory for the given handler registry.
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }
}

impl WorkerFactory for ThreadWorkerFactory {
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn Worker>, AppError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = Arc::clone(&self.executor);
        let name = format!("filemgr-worker-{}", events.slot());

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || match host::serve(&executor, &mut rx, &events) {
                Ok(()) => {
                    events.exit(Some(0));
                }
                Err(e) => {
                    events.error(e.to_string());
                    events.exit(Some(1));
                }
            })
            .map_err(|e| AppError::worker(format!("Failed to spawn {name}: {e}")))?;

        tracing::debug!("Spawned thread worker '{}'", name);

        Ok(Box::new(ThreadWorker {
            name,
            inbound: Some(tx),
            thread: Some(thread),
        }))
    }
}

/// Handle to a worker thread.
#[derive(Debug)]
pub struct ThreadWorker {
    name: String,
    inbound: Option<UnboundedSender<ManagerMessage>>,
    thread: Option<JoinHandle<()>>,
}

#[async_trait]
impl Worker for ThreadWorker {
    fn post(&mut self, message: ManagerMessage) -> Result<(), AppError> {
        let inbound = self
            .inbound
            .as_ref()
            .ok_or_else(|| AppError::worker(format!("{} has been terminated", self.name)))?;
        inbound
            .send(message)
            .map_err(|_| AppError::worker(format!("{} is no longer running", self.name)))
    }

    /// Closes the inbound channel. A running handler observes this as
    /// cancellation; the thread is detached rather than joined so a handler
    /// that never polls for cancellation cannot stall shutdown.
    async fn terminate(&mut self) -> Result<(), AppError> {
        self.inbound.take();
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                thread
                    .join()
                    .map_err(|_| AppError::worker(format!("{} panicked", self.name)))?;
            } else {
                tracing::debug!("Detaching busy worker thread '{}'", self.name);
            }
        }
        Ok(())
    }
}
