//! Workers backed by a child process speaking JSON lines.
//!
//! The child reads one [`ManagerMessage`] per stdin line and writes one
//! [`WorkerMessage`] per stdout line. Its stderr is inherited so worker logs
//! land next to the scheduler's.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use filemgr_core::error::AppError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing;

use crate::protocol::{ManagerMessage, WorkerMessage};

use super::{Worker, WorkerEvents, WorkerFactory};

type KillAck = oneshot::Sender<Result<(), AppError>>;

/// Launches `program args...` once per worker.
#[derive(Debug, Clone)]
pub struct ProcessWorkerFactory {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessWorkerFactory {
    /// Create a factory for the given entry point.
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn Worker>, AppError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::worker(format!(
                    "Failed to start worker process '{}': {e}",
                    self.program.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::worker("Worker process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::worker("Worker process has no stdout"))?;

        let name = format!(
            "filemgr-worker-{} (pid {})",
            events.slot(),
            child.id().unwrap_or_default()
        );
        tracing::debug!("Spawned process worker '{}'", name);

        let (tx, rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(write_messages(stdin, rx, name.clone()));
        tokio::spawn(read_messages(stdout, events.clone()));
        tokio::spawn(supervise(child, kill_rx, events));

        Ok(Box::new(ProcessWorker {
            name,
            inbound: Some(tx),
            kill: Some(kill_tx),
        }))
    }
}

/// Handle to a worker process.
#[derive(Debug)]
pub struct ProcessWorker {
    name: String,
    inbound: Option<mpsc::UnboundedSender<ManagerMessage>>,
    kill: Option<oneshot::Sender<KillAck>>,
}

#[async_trait]
impl Worker for ProcessWorker {
    fn post(&mut self, message: ManagerMessage) -> Result<(), AppError> {
        let inbound = self
            .inbound
            .as_ref()
            .ok_or_else(|| AppError::worker(format!("{} has been terminated", self.name)))?;
        inbound
            .send(message)
            .map_err(|_| AppError::worker(format!("{} stdin is closed", self.name)))
    }

    async fn terminate(&mut self) -> Result<(), AppError> {
        self.inbound.take();
        let Some(kill) = self.kill.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if kill.send(ack_tx).is_err() {
            // Supervisor already observed the exit.
            return Ok(());
        }
        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }
}

/// Encode a message as a single protocol line, newline included.
pub fn encode_line(message: &ManagerMessage) -> Result<String, AppError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode a protocol line. Blank lines decode to `None`.
pub fn decode_line(line: &str) -> Result<Option<WorkerMessage>, AppError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

async fn write_messages(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<ManagerMessage>,
    name: String,
) {
    while let Some(message) = rx.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode message for {}: {}", name, e);
                continue;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!("Failed to write to {}: {}", name, e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!("Failed to flush {}: {}", name, e);
            break;
        }
    }
}

async fn read_messages(stdout: ChildStdout, events: WorkerEvents) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_line(&line) {
                Ok(Some(message)) => {
                    if !events.message(message) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    "Ignoring malformed line from worker slot {}: {}",
                    events.slot(),
                    e
                ),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read from worker slot {}: {}", events.slot(), e);
                break;
            }
        }
    }
}

async fn supervise(mut child: Child, kill_rx: oneshot::Receiver<KillAck>, events: WorkerEvents) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => {
                events.exit(status.code());
            }
            Err(e) => {
                events.error(format!("Failed to wait for worker process: {e}"));
            }
        },
        Ok(ack) = kill_rx => {
            let result = child
                .kill()
                .await
                .map_err(|e| AppError::worker(format!("Failed to kill worker process: {e}")));
            let _ = ack.send(result);
            events.exit(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::protocol::{TaskRequest, TaskResult, TaskType};
    use crate::worker::{WorkerEvent, WorkerEventKind};

    #[test]
    fn test_line_codec() {
        let line = encode_line(&ManagerMessage::Cancel {
            operation_id: "op".to_string(),
        })
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        assert_eq!(decode_line("   ").unwrap(), None);
        assert!(decode_line("{broken").is_err());
        let decoded = decode_line(r#"{"type":"result","id":"x","success":true,"data":1}"#)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, WorkerMessage::Result(TaskResult::ok("x", json!(1))));
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("event channel closed")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_worker_reports_result_and_exit_code() {
        let factory = ProcessWorkerFactory::new(
            PathBuf::from("sh"),
            vec![
                "-c".to_string(),
                r#"read line; printf '%s\n' '{"type":"result","id":"x","success":true,"data":7}'; exit 3"#
                    .to_string(),
            ],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = factory.spawn(WorkerEvents::new(0, 1, tx)).unwrap();

        worker
            .post(ManagerMessage::Task(TaskRequest {
                id: "x".to_string(),
                task_type: TaskType::ListDirectory,
                payload: json!({}),
                operation_id: None,
            }))
            .unwrap();

        let mut kinds = vec![next_event(&mut rx).await, next_event(&mut rx).await]
            .into_iter()
            .map(|e| {
                assert_eq!((e.slot, e.generation), (0, 1));
                e.kind
            })
            .collect::<Vec<_>>();
        kinds.sort_by_key(|k| matches!(k, WorkerEventKind::Exit(_)));

        assert_eq!(
            kinds[0],
            WorkerEventKind::Message(WorkerMessage::Result(TaskResult::ok("x", json!(7))))
        );
        assert_eq!(kinds[1], WorkerEventKind::Exit(Some(3)));
        worker.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_idle_process() {
        let factory = ProcessWorkerFactory::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "sleep 30".to_string()],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = factory.spawn(WorkerEvents::new(2, 5, tx)).unwrap();

        worker.terminate().await.unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, WorkerEventKind::Exit(None));
        assert!(worker.post(ManagerMessage::Cancel {
            operation_id: "op".to_string()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_missing_entry_point_fails_to_spawn() {
        let factory = ProcessWorkerFactory::new(
            PathBuf::from("/nonexistent/filemgr-taskd"),
            Vec::new(),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = factory.spawn(WorkerEvents::new(0, 1, tx)).unwrap_err();
        assert!(err.message.contains("Failed to start worker process"));
    }
}
