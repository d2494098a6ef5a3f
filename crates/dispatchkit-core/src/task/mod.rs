//! # Task Module
//!
//! Typed units of asynchronous work executed on a managed worker pool.
//!
//! ## Overview
//!
//! - [`Task`] wraps a fallible computation with an explicit lifecycle:
//!   `Waiting -> Running -> Done`, classified `Success`, `Failed` or
//!   `Cancelled`
//! - [`TaskManager`] owns the bounded worker pool, tracks in-flight tasks
//!   and publishes lifecycle notifications
//! - [`TaskManager::invoke`] is synchronous and reentrant: called from a
//!   worker thread of the same pool, the task runs inline on the calling
//!   thread instead of queueing, so a saturated pool cannot deadlock on
//!   helper tasks
//! - [`CompositeTask`] aggregates child tasks with additive progress
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dispatchkit_core::task::{Task, TaskManager};
//!
//! let manager = TaskManager::new();
//! manager.start();
//!
//! let task = Task::new("answer", |_ctx| Ok(42));
//! manager.submit(&task)?;
//! assert_eq!(task.join()?, 42);
//!
//! manager.stop_and_wait(None)?;
//! ```

mod composite;
mod event;
mod manager;
mod pool;
#[allow(clippy::module_inception)]
mod task;

pub use composite::CompositeTask;
pub use event::{TaskEvent, TaskEventKind, TaskListener};
pub use manager::{TaskManager, TaskManagerConfig};
pub use task::{Task, TaskContext, TaskHandle, TaskId, TaskOutcome, TaskState};
