//! Task executor dispatching worker-side requests to registered handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing;

use crate::host::MessageSink;
use crate::protocol::{ManagerMessage, TaskProgress, TaskRequest, TaskType, WorkerMessage};

/// Trait for handler implementations run inside a worker.
///
/// Handlers execute synchronously on the worker's own thread or process and
/// should poll [`TaskContext::is_cancelled`] between units of work.
pub trait TaskHandler: Send + Sync + std::fmt::Debug {
    /// Get the task type this handler processes
    fn task_type(&self) -> TaskType;

    /// Execute the task with the given payload
    fn execute(
        &self,
        request: &TaskRequest,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError>;
}

/// Error from handler execution, reported to the scheduler as a failed result.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload is missing fields or has the wrong shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation observed a cancel signal and stopped
    #[error("Operation cancelled")]
    Cancelled,

    /// Any other handler failure
    #[error("{0}")]
    Failed(String),
}

/// Execution context handed to a running handler.
///
/// Owns nothing shared with the scheduler: progress is sent as a message,
/// and cancellation is observed by reading the worker's own inbound channel.
pub struct TaskContext<'a> {
    task: TaskType,
    operation_id: Option<String>,
    inbound: &'a mut UnboundedReceiver<ManagerMessage>,
    backlog: &'a mut VecDeque<TaskRequest>,
    sink: &'a dyn MessageSink,
    cancelled: bool,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        request: &TaskRequest,
        inbound: &'a mut UnboundedReceiver<ManagerMessage>,
        backlog: &'a mut VecDeque<TaskRequest>,
        sink: &'a dyn MessageSink,
    ) -> Self {
        Self {
            task: request.task_type,
            operation_id: request.operation_id.clone(),
            inbound,
            backlog,
            sink,
            cancelled: false,
        }
    }

    /// Operation this task belongs to, if any.
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Emit a progress update for the running task.
    pub fn progress(&self, data: Value) {
        let progress = TaskProgress {
            task: self.task,
            operation_id: self.operation_id.clone(),
            data,
        };
        if let Err(e) = self.sink.send(WorkerMessage::Progress(progress)) {
            tracing::debug!("Dropping progress for {}: {}", self.task, e);
        }
    }

    /// Whether a cancel signal for this task's operation has arrived.
    ///
    /// A closed inbound channel (the scheduler terminated this worker) also
    /// counts as cancellation.
    pub fn is_cancelled(&mut self) -> bool {
        while !self.cancelled {
            match self.inbound.try_recv() {
                Ok(ManagerMessage::Cancel { operation_id }) => {
                    if self.operation_id.as_deref() == Some(operation_id.as_str()) {
                        tracing::debug!("Task {} observed cancel for '{}'", self.task, operation_id);
                        self.cancelled = true;
                    }
                }
                Ok(ManagerMessage::Task(request)) => {
                    tracing::warn!("Received task {} while busy, deferring", request.id);
                    self.backlog.push_back(request);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.cancelled = true,
            }
        }
        self.cancelled
    }

    /// Return [`HandlerError::Cancelled`] if the operation was cancelled.
    pub fn check_cancelled(&mut self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Dispatches requests to the appropriate handler based on task type
#[derive(Debug, Default)]
pub struct TaskExecutor {
    /// Registered handlers by type
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskExecutor {
    /// Create an executor with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task handler, replacing any previous handler for its type
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type();
        tracing::debug!("Registered task handler for type '{}'", task_type);
        self.handlers.insert(task_type, handler);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Execute a request by dispatching to the correct handler
    pub fn execute(
        &self,
        request: &TaskRequest,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        let handler = self.handlers.get(&request.task_type).ok_or_else(|| {
            HandlerError::Failed(format!(
                "No handler registered for task type '{}'",
                request.task_type
            ))
        })?;

        tracing::debug!(
            "Executing task: id={}, type='{}', operation={:?}",
            request.id,
            request.task_type,
            request.operation_id
        );

        handler.execute(request, ctx)
    }

    /// Check if a handler is registered for a task type
    pub fn has_handler(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Get the list of registered task types
    pub fn registered_types(&self) -> Vec<TaskType> {
        self.handlers.keys().copied().collect()
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::testing::RecordingSink;
    use super::*;

    #[derive(Debug)]
    struct Echo;

    impl TaskHandler for Echo {
        fn task_type(&self) -> TaskType {
            TaskType::SearchFiles
        }

        fn execute(
            &self,
            request: &TaskRequest,
            ctx: &mut TaskContext<'_>,
        ) -> Result<Value, HandlerError> {
            ctx.progress(json!({"step": 1}));
            Ok(request.payload.clone())
        }
    }

    fn request(task_type: TaskType, op: Option<&str>) -> TaskRequest {
        TaskRequest {
            id: "t-1".to_string(),
            task_type,
            payload: json!({"q": "x"}),
            operation_id: op.map(str::to_string),
        }
    }

    #[test]
    fn test_executor_dispatches_by_type() {
        let executor = TaskExecutor::new().with_handler(Arc::new(Echo));
        assert!(executor.has_handler(TaskType::SearchFiles));
        assert_eq!(executor.registered_types(), vec![TaskType::SearchFiles]);

        let (_tx, mut rx) = mpsc::unbounded_channel();
        let mut backlog = VecDeque::new();
        let sink = RecordingSink::default();
        let req = request(TaskType::SearchFiles, Some("op"));
        let mut ctx = TaskContext::new(&req, &mut rx, &mut backlog, &sink);

        let out = executor.execute(&req, &mut ctx).unwrap();
        assert_eq!(out, json!({"q": "x"}));
        let messages = sink.0.lock().unwrap();
        assert!(matches!(
            &messages[0],
            WorkerMessage::Progress(p) if p.operation_id.as_deref() == Some("op")
        ));
    }

    #[test]
    fn test_missing_handler_fails() {
        let executor = TaskExecutor::new();
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let mut backlog = VecDeque::new();
        let sink = RecordingSink::default();
        let req = request(TaskType::BuildIndex, None);
        let mut ctx = TaskContext::new(&req, &mut rx, &mut backlog, &sink);

        let err = executor.execute(&req, &mut ctx).unwrap_err();
        assert!(err.to_string().contains("build_index"));
    }

    #[test]
    fn test_cancel_only_matches_own_operation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backlog = VecDeque::new();
        let sink = RecordingSink::default();
        let req = request(TaskType::SearchContent, Some("mine"));
        let mut ctx = TaskContext::new(&req, &mut rx, &mut backlog, &sink);

        tx.send(ManagerMessage::Cancel {
            operation_id: "other".to_string(),
        })
        .unwrap();
        assert!(!ctx.is_cancelled());

        tx.send(ManagerMessage::Cancel {
            operation_id: "mine".to_string(),
        })
        .unwrap();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check_cancelled(), Err(HandlerError::Cancelled)));
    }

    #[test]
    fn test_closed_inbound_counts_as_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ManagerMessage>();
        drop(tx);
        let mut backlog = VecDeque::new();
        let sink = RecordingSink::default();
        let req = request(TaskType::SearchContent, None);
        let mut ctx = TaskContext::new(&req, &mut rx, &mut backlog, &sink);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_task_received_while_busy_is_deferred() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backlog = VecDeque::new();
        let sink = RecordingSink::default();
        let req = request(TaskType::SearchContent, None);
        tx.send(ManagerMessage::Task(request(TaskType::ListDirectory, None)))
            .unwrap();
        {
            let mut ctx = TaskContext::new(&req, &mut rx, &mut backlog, &sink);
            assert!(!ctx.is_cancelled());
        }
        assert_eq!(backlog.len(), 1);
    }
}
