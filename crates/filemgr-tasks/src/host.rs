//! Worker-side host loop.
//!
//! The same loop runs inside a [`ThreadWorker`](crate::worker::thread::ThreadWorker)
//! and inside a worker child process (`filemgr-taskd worker`). It receives
//! [`ManagerMessage`]s, runs each task through the [`TaskExecutor`], and
//! answers with exactly one [`WorkerMessage::Result`] per task. A panicking
//! handler ends the loop with an error so the owner can report a crash.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use filemgr_core::error::AppError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing;

use crate::executor::{TaskContext, TaskExecutor};
use crate::protocol::{ManagerMessage, TaskRequest, TaskResult, WorkerMessage};

/// Destination for messages a worker sends back to the scheduler.
pub trait MessageSink: Send + Sync {
    /// Deliver one message.
    fn send(&self, message: WorkerMessage) -> Result<(), AppError>;
}

/// Serve tasks until the inbound channel closes.
///
/// Returns `Ok(())` on a clean close and `Err` when a handler panicked or
/// the sink stopped accepting messages.
pub fn serve(
    executor: &TaskExecutor,
    inbound: &mut UnboundedReceiver<ManagerMessage>,
    sink: &dyn MessageSink,
) -> Result<(), AppError> {
    let mut backlog = VecDeque::new();

    loop {
        let request = match backlog.pop_front() {
            Some(request) => request,
            None => match inbound.blocking_recv() {
                Some(ManagerMessage::Task(request)) => request,
                Some(ManagerMessage::Cancel { operation_id }) => {
                    tracing::trace!("Ignoring cancel for idle operation '{}'", operation_id);
                    continue;
                }
                None => return Ok(()),
            },
        };

        let result = run_one(executor, &request, inbound, &mut backlog, sink)?;
        sink.send(WorkerMessage::Result(result))?;
    }
}

fn run_one(
    executor: &TaskExecutor,
    request: &TaskRequest,
    inbound: &mut UnboundedReceiver<ManagerMessage>,
    backlog: &mut VecDeque<TaskRequest>,
    sink: &dyn MessageSink,
) -> Result<TaskResult, AppError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = TaskContext::new(request, inbound, backlog, sink);
        executor.execute(request, &mut ctx)
    }));

    match outcome {
        Ok(Ok(data)) => Ok(TaskResult::ok(&request.id, data)),
        Ok(Err(e)) => {
            tracing::debug!("Task {} failed: {}", request.id, e);
            Ok(TaskResult::failed(&request.id, e.to_string()))
        }
        Err(payload) => Err(AppError::worker(format!(
            "Handler panicked while running task {}: {}",
            request.id,
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sink that writes one JSON document per line.
#[derive(Debug)]
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LineSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> MessageSink for LineSink<W> {
    fn send(&self, message: WorkerMessage) -> Result<(), AppError> {
        let line = serde_json::to_string(&message)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AppError::internal("Output writer lock poisoned"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Forward JSON lines from `reader` into `tx` until EOF or the receiver closes.
pub fn pump_lines<R: BufRead>(reader: R, tx: UnboundedSender<ManagerMessage>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read from scheduler: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ManagerMessage>(&line) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Ignoring malformed scheduler message: {}", e),
        }
    }
}

/// Serve a JSON-lines conversation: requests from `reader`, replies to `writer`.
///
/// Returns the writer once `reader` reaches EOF and every received task
/// has been answered.
pub fn serve_lines<R, W>(executor: &TaskExecutor, reader: R, writer: W) -> Result<W, AppError>
where
    R: BufRead + Send + 'static,
    W: Write + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("filemgr-worker-input".to_string())
        .spawn(move || pump_lines(reader, tx))?;

    let sink = LineSink::new(writer);
    serve(executor, &mut rx, &sink)?;
    Ok(sink.into_inner())
}

/// Entry point of a worker child process: serve over stdin/stdout.
pub fn run_stdio(executor: &TaskExecutor) -> Result<(), AppError> {
    let stdin = std::io::BufReader::new(std::io::stdin());
    serve_lines(executor, stdin, std::io::stdout())?;
    Ok(())
}
