//! Shared helpers for scheduler integration tests.
//!
//! [`ScriptedFactory`] spawns workers that record what they are sent and let
//! the test decide when and how they answer.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use filemgr_core::error::AppError;
use filemgr_tasks::protocol::{ManagerMessage, TaskProgress, TaskRequest, TaskResult, WorkerMessage};
use filemgr_tasks::worker::{Worker, WorkerEvents, WorkerFactory};
use filemgr_tasks::{PoolStats, TaskManager};

/// Test-side view of one spawned worker.
#[derive(Debug, Clone)]
pub struct ScriptedHandle {
    pub events: WorkerEvents,
    posted: Arc<Mutex<Vec<ManagerMessage>>>,
    terminated: Arc<AtomicBool>,
}

impl ScriptedHandle {
    /// Every task posted to this worker, in order.
    pub fn tasks(&self) -> Vec<TaskRequest> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                ManagerMessage::Task(t) => Some(t.clone()),
                ManagerMessage::Cancel { .. } => None,
            })
            .collect()
    }

    /// Operation ids of every cancel message posted to this worker.
    pub fn cancels(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                ManagerMessage::Cancel { operation_id } => Some(operation_id.clone()),
                ManagerMessage::Task(_) => None,
            })
            .collect()
    }

    /// The most recent task posted to this worker.
    pub fn last_task(&self) -> TaskRequest {
        self.tasks().pop().expect("worker has not received a task")
    }

    pub fn complete(&self, id: &str, data: Value) {
        self.events
            .message(WorkerMessage::Result(TaskResult::ok(id, data)));
    }

    pub fn fail(&self, id: &str, error: &str) {
        self.events
            .message(WorkerMessage::Result(TaskResult::failed(id, error)));
    }

    pub fn progress(&self, progress: TaskProgress) {
        self.events.message(WorkerMessage::Progress(progress));
    }

    pub fn crash(&self, cause: &str) {
        self.events.error(cause);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ScriptedWorker {
    posted: Arc<Mutex<Vec<ManagerMessage>>>,
    terminated: Arc<AtomicBool>,
    fail_terminate: bool,
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn post(&mut self, message: ManagerMessage) -> Result<(), AppError> {
        self.posted.lock().unwrap().push(message);
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), AppError> {
        self.terminated.store(true, Ordering::SeqCst);
        if self.fail_terminate {
            Err(AppError::worker("refused to die"))
        } else {
            Ok(())
        }
    }
}

/// Factory producing [`ScriptedWorker`]s.
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    spawned: Mutex<Vec<ScriptedHandle>>,
    fail_spawn: AtomicBool,
    fail_terminate: AtomicBool,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later spawn fail (or succeed again).
    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Make every later-spawned worker fail to terminate.
    pub fn set_fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }

    /// Latest worker spawned for `slot`.
    pub fn worker(&self, slot: usize) -> ScriptedHandle {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|h| h.events.slot() == slot)
            .cloned()
            .expect("no worker spawned for slot")
    }

    /// Every worker spawned so far.
    pub fn all(&self) -> Vec<ScriptedHandle> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

impl WorkerFactory for ScriptedFactory {
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn Worker>, AppError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(AppError::worker("spawn refused"));
        }
        let posted = Arc::new(Mutex::new(Vec::new()));
        let terminated = Arc::new(AtomicBool::new(false));
        self.spawned.lock().unwrap().push(ScriptedHandle {
            events,
            posted: Arc::clone(&posted),
            terminated: Arc::clone(&terminated),
        });
        Ok(Box::new(ScriptedWorker {
            posted,
            terminated,
            fail_terminate: self.fail_terminate.load(Ordering::SeqCst),
        }))
    }
}

/// Start a manager over a scripted factory.
pub fn start(pool_size: usize, max_queue_length: usize) -> (TaskManager, Arc<ScriptedFactory>) {
    let factory = ScriptedFactory::new();
    let manager = TaskManager::start(pool_size, max_queue_length, 64, factory.clone())
        .expect("manager should start");
    (manager, factory)
}

/// Fail the test if `fut` does not finish within five seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// Wait until every command sent so far has been processed.
pub async fn barrier(manager: &TaskManager) -> PoolStats {
    within(manager.stats()).await.expect("manager is running")
}

/// Poll stats until `cond` holds.
pub async fn wait_for(manager: &TaskManager, cond: impl Fn(&PoolStats) -> bool) -> PoolStats {
    within(async {
        loop {
            let stats = barrier(manager).await;
            if cond(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
