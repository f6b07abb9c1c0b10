//! Background task scheduling for FileMgr.
//!
//! This crate provides:
//! - A [`TaskManager`] that queues file operations in strict FIFO order and
//!   dispatches them onto a fixed pool of isolated workers
//! - Worker implementations backed by dedicated threads or child processes,
//!   with crash detection and in-place slot replacement
//! - The worker-side host loop and a handler registry ([`TaskExecutor`])
//! - Built-in handlers for folder sizes, checksums, and directory listings

pub mod error;
pub mod executor;
pub mod host;
pub mod jobs;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod worker;

pub use error::TaskError;
pub use executor::{TaskContext, TaskExecutor, TaskHandler};
pub use manager::{CancelOutcome, PoolStats, TaskManager};
pub use protocol::{TaskProgress, TaskRequest, TaskResult, TaskType};
