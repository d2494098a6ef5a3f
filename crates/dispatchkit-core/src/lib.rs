//! # Dispatchkit Core
//!
//! Core event dispatch and task execution for dispatchkit.
//! Provides the fundamental abstractions for publish/subscribe event
//! delivery and managed background work:
//!
//! - **Event bus**: named priority queues drained by a single dispatch
//!   thread, with per-queue fairness and category-filtered listeners
//! - **Task pool**: a bounded worker pool with typed task lifecycles,
//!   listener notification and reentrant synchronous invocation
//!
//! Collaborators stay behind narrow seams: logging goes through the
//! `tracing` facade and settings persistence through the
//! [`SettingsStore`] trait.

pub mod error;
pub mod event_bus;
pub mod settings;
pub mod task;

pub use error::{Error, EventError, Result, TaskError};

pub use event_bus::{
    DiagnosticEvent, Event, EventBus, EventCategory, EventFilter, EventKind, EventListener,
    LifecycleEvent, SettingChange,
};

pub use settings::SettingsStore;

pub use task::{
    CompositeTask, Task, TaskContext, TaskEvent, TaskEventKind, TaskHandle, TaskId, TaskListener,
    TaskManager, TaskManagerConfig, TaskOutcome, TaskState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
