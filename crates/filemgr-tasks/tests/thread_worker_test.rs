//! End-to-end scheduling over real thread workers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use filemgr_tasks::executor::HandlerError;
use filemgr_tasks::jobs;
use filemgr_tasks::worker::thread::ThreadWorkerFactory;
use filemgr_tasks::{TaskContext, TaskError, TaskHandler, TaskManager, TaskRequest, TaskType};

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

/// Echoes its payload back.
#[derive(Debug)]
struct EchoHandler;

impl TaskHandler for EchoHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SearchFiles
    }

    fn execute(
        &self,
        request: &TaskRequest,
        _ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        Ok(request.payload.clone())
    }
}

/// Panics on every request.
#[derive(Debug)]
struct PanicHandler;

impl TaskHandler for PanicHandler {
    fn task_type(&self) -> TaskType {
        TaskType::BuildIndex
    }

    fn execute(
        &self,
        _request: &TaskRequest,
        _ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        panic!("index corrupted");
    }
}

/// Spins until cancelled, reporting progress once it has started.
#[derive(Debug)]
struct SpinHandler;

impl TaskHandler for SpinHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SearchContent
    }

    fn execute(
        &self,
        _request: &TaskRequest,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value, HandlerError> {
        ctx.progress(json!({"started": true}));
        for _ in 0..2000 {
            ctx.check_cancelled()?;
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(json!("finished without cancel"))
    }
}

fn manager(pool_size: usize) -> TaskManager {
    let executor = jobs::default_executor()
        .with_handler(Arc::new(EchoHandler))
        .with_handler(Arc::new(PanicHandler))
        .with_handler(Arc::new(SpinHandler));
    let factory = Arc::new(ThreadWorkerFactory::new(Arc::new(executor)));
    TaskManager::start(pool_size, 100, 64, factory).unwrap()
}

#[tokio::test]
async fn test_thread_worker_round_trip() {
    let manager = manager(2);
    let tasks: Vec<_> = (0..6)
        .map(|n| manager.submit(TaskType::SearchFiles, json!({"n": n}), None))
        .collect();

    for (n, task) in tasks.into_iter().enumerate() {
        assert_eq!(within(task).await.unwrap(), json!({"n": n}));
    }
    within(manager.shutdown()).await;
}

#[tokio::test]
async fn test_unregistered_type_fails_the_task_only() {
    let manager = manager(1);
    let err = within(manager.submit(TaskType::SaveIndex, json!({}), None))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Failed(ref msg) if msg.contains("save_index")));

    let stats = within(manager.stats()).await.unwrap();
    assert_eq!(stats.slots[0].restarts, 0);
    within(manager.shutdown()).await;
}

#[tokio::test]
async fn test_panicking_handler_crashes_and_is_replaced() {
    let manager = manager(1);
    let err = within(manager.submit(TaskType::BuildIndex, json!({}), None))
        .await
        .unwrap_err();
    match err {
        TaskError::WorkerCrashed(cause) => assert!(cause.contains("index corrupted")),
        other => panic!("expected crash, got {other:?}"),
    }

    let echoed = within(manager.submit(TaskType::SearchFiles, json!("after"), None)).await;
    assert_eq!(echoed.unwrap(), json!("after"));

    let stats = within(manager.stats()).await.unwrap();
    assert_eq!(stats.pool_size, 1);
    assert_eq!(stats.slots[0].restarts, 1);
    within(manager.shutdown()).await;
}

#[tokio::test]
async fn test_running_handler_observes_cancel() {
    let manager = manager(1);
    let mut progress = manager.subscribe_progress();
    let task = tokio::spawn(manager.submit(
        TaskType::SearchContent,
        json!({}),
        Some("op-spin".to_string()),
    ));

    let update = within(progress.recv()).await.unwrap();
    assert_eq!(update.operation_id.as_deref(), Some("op-spin"));

    let outcome = within(manager.cancel("op-spin")).await;
    assert_eq!(outcome.signalled_workers, 1);

    let result = within(task).await.unwrap();
    assert_eq!(
        result,
        Err(TaskError::Failed("Operation cancelled".to_string()))
    );
    within(manager.shutdown()).await;
}

#[tokio::test]
async fn test_builtin_handlers_on_real_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello world").unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    std::fs::write(dir.path().join("nested/data.bin"), vec![7u8; 89]).unwrap();

    let manager = manager(2);
    let size = manager.submit(
        TaskType::CalculateFolderSize,
        json!({"path": dir.path()}),
        Some("op-files".to_string()),
    );
    let checksum = manager.submit(
        TaskType::CalculateChecksum,
        json!({"path": dir.path().join("hello.txt")}),
        Some("op-files".to_string()),
    );
    let listing = manager.submit(
        TaskType::ListDirectory,
        json!({"path": dir.path()}),
        None,
    );

    let size = within(size).await.unwrap();
    assert_eq!(size["total_bytes"], json!(100));
    assert_eq!(size["files"], json!(2));

    let checksum = within(checksum).await.unwrap();
    assert_eq!(
        checksum["checksum"],
        json!("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
    );

    let listing = within(listing).await.unwrap();
    let names: Vec<&str> = listing["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["nested", "hello.txt"]);

    within(manager.shutdown()).await;
}

#[tokio::test]
async fn test_shutdown_detaches_busy_thread() {
    let manager = manager(1);
    let task = tokio::spawn(manager.submit(
        TaskType::SearchContent,
        json!({}),
        Some("op-long".to_string()),
    ));
    let mut progress = manager.subscribe_progress();
    let _ = within(progress.recv()).await;

    within(manager.shutdown()).await;
    assert_eq!(within(task).await.unwrap(), Err(TaskError::ShuttingDown));
}
