//! Typed units of asynchronous work.
//!
//! A [`Task`] wraps a single fallible computation with an explicit
//! lifecycle: it is created `Waiting`, transitions to `Running` immediately
//! before the body is invoked, and ends `Done` with a result
//! classification of `Success`, `Failed` or `Cancelled`. Transitions are
//! monotonic; a task instance runs at most once.
//!
//! The task doubles as its own future-like handle: any number of threads
//! may [`join`](Task::join) it, which is why the value type must be
//! `Clone`. The captured failure of a body is re-raised to every joiner;
//! threads that never join observe failures only through lifecycle
//! notifications.

use parking_lot::{Condvar, Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::event::{TaskEvent, TaskEventKind, TaskListener};
use super::manager::TaskManager;
use crate::error::{panic_message, Error, Result, TaskError};

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet started.
    Waiting,
    /// The body is executing.
    Running,
    /// Terminal; see [`TaskOutcome`] for the classification.
    Done,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Waiting => write!(f, "Waiting"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Done => write!(f, "Done"),
        }
    }
}

/// Result classification of a task, meaningful only once `Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Not yet classified.
    Unknown,
    /// The body returned a value.
    Success,
    /// The body returned an error or panicked.
    Failed,
    /// The task was cancelled.
    Cancelled,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Unknown => write!(f, "Unknown"),
            TaskOutcome::Success => write!(f, "Success"),
            TaskOutcome::Failed => write!(f, "Failed"),
            TaskOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}

struct Lifecycle {
    state: TaskState,
    outcome: TaskOutcome,
}

/// Type-erased task bookkeeping shared by `Task<T>` and `TaskHandle`.
pub(crate) struct TaskMeta {
    id: TaskId,
    name: String,
    lifecycle: Mutex<Lifecycle>,
    done: Condvar,
    cancelled: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn TaskListener>>>,
    manager: Mutex<Option<TaskManager>>,
    progress: AtomicU64,
    minimum: AtomicU64,
    maximum: AtomicU64,
}

impl TaskMeta {
    fn new(name: String) -> Self {
        Self {
            id: TaskId::new(),
            name,
            lifecycle: Mutex::new(Lifecycle {
                state: TaskState::Waiting,
                outcome: TaskOutcome::Unknown,
            }),
            done: Condvar::new(),
            cancelled: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            manager: Mutex::new(None),
            progress: AtomicU64::new(0),
            minimum: AtomicU64::new(0),
            maximum: AtomicU64::new(1),
        }
    }

    fn wait_done(&self, timeout: Option<Duration>) -> std::result::Result<(), TaskError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state != TaskState::Done {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline
                        || self
                            .done
                            .wait_for(&mut lifecycle, deadline - now)
                            .timed_out()
                    {
                        if lifecycle.state == TaskState::Done {
                            break;
                        }
                        return Err(TaskError::Timeout {
                            timeout_ms: timeout.unwrap_or_default().as_millis() as u64,
                        });
                    }
                }
                None => self.done.wait(&mut lifecycle),
            }
        }
        Ok(())
    }

    /// Notify task-level listeners, swallowing panics.
    fn fire(&self, kind: TaskEventKind, handle: &TaskHandle) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        if listeners.is_empty() {
            return;
        }
        let event = TaskEvent::new(handle.clone(), kind);
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_task_event(&event))) {
                tracing::error!(
                    task = %self.id,
                    kind = %kind,
                    panic = panic_message(panic.as_ref()),
                    "task listener panicked"
                );
            }
        }
    }

    /// Hand the terminal transition to the owning manager, if any.
    fn complete(&self, handle: &TaskHandle) {
        let manager = self.manager.lock().clone();
        if let Some(manager) = manager {
            manager.completed(handle);
        }
    }
}

/// Internal execution surface shared by every task shape.
pub(crate) trait ManagedTask: Send + Sync {
    fn meta(&self) -> &TaskMeta;

    /// Run the wrapped body with full lifecycle bookkeeping.
    fn run(&self, ctx: &TaskContext);
}

/// A cheap, cloneable, type-erased view of a task
///
/// Handles are what the manager's live set, lifecycle events and
/// heterogeneous batch operations traffic in. A handle observes and
/// controls the task but cannot read its typed value; keep the `Task<T>`
/// for that.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<dyn ManagedTask>,
}

impl TaskHandle {
    pub(crate) fn from_arc(inner: Arc<dyn ManagedTask>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn ManagedTask> {
        Arc::downgrade(&self.inner)
    }

    /// Unique identifier of the task
    pub fn id(&self) -> TaskId {
        self.inner.meta().id
    }

    /// Human-readable task name
    pub fn name(&self) -> String {
        self.inner.meta().name.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.inner.meta().lifecycle.lock().state
    }

    /// Result classification; `Unknown` until the task is done
    pub fn outcome(&self) -> TaskOutcome {
        self.inner.meta().lifecycle.lock().outcome
    }

    /// Whether the task reached its terminal state
    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.meta().cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the task
    ///
    /// Before the body starts this transitions the task directly to
    /// `Done`/`Cancelled` and the body is skipped. While running,
    /// cancellation is best-effort: the flag is observable through
    /// [`TaskContext::is_cancelled`] and the task completes with whatever
    /// classification results.
    pub fn cancel(&self) {
        let meta = self.inner.meta();
        let transitioned = {
            let mut lifecycle = meta.lifecycle.lock();
            meta.cancelled.store(true, Ordering::SeqCst);
            if lifecycle.state == TaskState::Waiting {
                lifecycle.state = TaskState::Done;
                lifecycle.outcome = TaskOutcome::Cancelled;
                true
            } else {
                false
            }
        };
        if transitioned {
            meta.done.notify_all();
            meta.fire(TaskEventKind::Finish, self);
            meta.complete(self);
        }
    }

    /// Block until the task is done
    pub fn wait(&self) {
        let _ = self.inner.meta().wait_done(None);
    }

    /// Block until the task is done or the timeout elapses
    ///
    /// On expiry returns [`TaskError::Timeout`]; the task keeps running.
    pub fn wait_timeout(&self, timeout: Duration) -> std::result::Result<(), TaskError> {
        self.inner.meta().wait_done(Some(timeout))
    }

    /// Progress floor, in arbitrary work units
    pub fn minimum(&self) -> u64 {
        self.inner.meta().minimum.load(Ordering::Relaxed)
    }

    /// Progress ceiling, in arbitrary work units
    pub fn maximum(&self) -> u64 {
        self.inner.meta().maximum.load(Ordering::Relaxed)
    }

    /// Current progress value
    pub fn progress(&self) -> u64 {
        self.inner.meta().progress.load(Ordering::Relaxed)
    }

    /// Register a task-level listener (`Start`, `Progress`, `Finish`)
    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        let mut listeners = self.inner.meta().listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a task-level listener; absent listeners are a no-op
    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) {
        self.inner
            .meta()
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn run(&self, ctx: &TaskContext) {
        self.inner.run(ctx);
    }

    pub(crate) fn set_manager(&self, manager: Option<TaskManager>) {
        *self.inner.meta().manager.lock() = manager;
    }

    pub(crate) fn set_progress(&self, value: u64) {
        self.inner.meta().progress.store(value, Ordering::Relaxed);
        self.inner.meta().fire(TaskEventKind::Progress, self);
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.inner.meta().maximum.store(total, Ordering::Relaxed);
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskHandle {}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.inner.meta();
        f.debug_struct("TaskHandle")
            .field("id", &meta.id)
            .field("name", &meta.name)
            .field("state", &self.state())
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Context handed to a running task body
///
/// Carries the task's own handle (for cancellation checks and progress
/// reporting) and the owning manager, which is how a body submits or
/// invokes helper tasks.
pub struct TaskContext {
    task: TaskHandle,
    manager: Option<TaskManager>,
}

impl TaskContext {
    pub(crate) fn new(task: TaskHandle, manager: Option<TaskManager>) -> Self {
        Self { task, manager }
    }

    /// Handle of the running task
    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// The manager executing this task, if it was submitted through one
    pub fn manager(&self) -> Option<&TaskManager> {
        self.manager.as_ref()
    }

    /// Whether cancellation has been requested for the running task
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Report progress, firing a `Progress` notification
    pub fn set_progress(&self, value: u64) {
        self.task.set_progress(value);
    }
}

type TaskWork<T> = Box<dyn FnOnce(&TaskContext) -> Result<T> + Send>;

struct TaskCore<T> {
    meta: TaskMeta,
    work: Mutex<Option<TaskWork<T>>>,
    value: Mutex<Option<std::result::Result<T, TaskError>>>,
}

impl<T: Send + 'static> ManagedTask for TaskCore<T> {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    fn run(&self, ctx: &TaskContext) {
        {
            let mut lifecycle = self.meta.lifecycle.lock();
            if lifecycle.state != TaskState::Waiting {
                // Already cancelled or already run; nothing to do.
                return;
            }
            lifecycle.state = TaskState::Running;
        }

        let handle = ctx.task().clone();
        tracing::debug!(task = %self.meta.id, name = %self.meta.name, "task starting");
        self.meta.fire(TaskEventKind::Start, &handle);

        let work = self.work.lock().take();
        let (outcome, stored) = match work {
            Some(work) => match catch_unwind(AssertUnwindSafe(|| work(ctx))) {
                Ok(Ok(value)) => (TaskOutcome::Success, Ok(value)),
                Ok(Err(Error::Task(TaskError::Cancelled))) => {
                    (TaskOutcome::Cancelled, Err(TaskError::Cancelled))
                }
                Ok(Err(error)) => (
                    TaskOutcome::Failed,
                    Err(TaskError::failed(error.to_string())),
                ),
                Err(panic) => (
                    TaskOutcome::Failed,
                    Err(TaskError::failed(panic_message(panic.as_ref()))),
                ),
            },
            None => (
                TaskOutcome::Failed,
                Err(TaskError::failed("task body already consumed")),
            ),
        };

        if let Err(error) = &stored {
            tracing::debug!(task = %self.meta.id, name = %self.meta.name, %error, "task finished");
        }

        *self.value.lock() = Some(stored);
        {
            let mut lifecycle = self.meta.lifecycle.lock();
            lifecycle.state = TaskState::Done;
            lifecycle.outcome = outcome;
        }
        self.meta.done.notify_all();
        self.meta.fire(TaskEventKind::Finish, &handle);
        self.meta.complete(&handle);
    }
}

/// A typed unit of asynchronous work
///
/// Cloning a `Task` clones the handle, not the work; all clones observe
/// the same lifecycle and value.
pub struct Task<T> {
    core: Arc<TaskCore<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static> Task<T> {
    /// Create a task wrapping a fallible computation
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<T> + Send + 'static,
    {
        Self {
            core: Arc::new(TaskCore {
                meta: TaskMeta::new(name.into()),
                work: Mutex::new(Some(Box::new(work))),
                value: Mutex::new(None),
            }),
        }
    }

    /// Type-erased handle to this task
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            inner: self.core.clone(),
        }
    }

    /// Unique identifier of the task
    pub fn id(&self) -> TaskId {
        self.core.meta.id
    }

    /// Human-readable task name
    pub fn name(&self) -> &str {
        &self.core.meta.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.core.meta.lifecycle.lock().state
    }

    /// Result classification; `Unknown` until the task is done
    pub fn outcome(&self) -> TaskOutcome {
        self.core.meta.lifecycle.lock().outcome
    }

    /// Whether the task reached its terminal state
    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.handle().is_cancelled()
    }

    /// Cancel the task; see [`TaskHandle::cancel`]
    pub fn cancel(&self) {
        self.handle().cancel();
    }

    /// Declare the progress ceiling for this task
    pub fn set_total(&self, total: u64) {
        self.handle().set_total(total);
    }

    /// Current progress value
    pub fn progress(&self) -> u64 {
        self.handle().progress()
    }

    /// Register a task-level listener (`Start`, `Progress`, `Finish`)
    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.handle().add_listener(listener);
    }

    /// Remove a task-level listener
    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) {
        self.handle().remove_listener(listener);
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Block until the task is done and return its value
    ///
    /// Re-raises the captured failure on `Failed` and
    /// [`TaskError::Cancelled`] on cancellation.
    pub fn join(&self) -> std::result::Result<T, TaskError> {
        self.core.meta.wait_done(None)?;
        self.collect()
    }

    /// Like [`join`](Task::join) with a deadline
    ///
    /// On expiry returns [`TaskError::Timeout`]; the task keeps running.
    pub fn join_timeout(&self, timeout: Duration) -> std::result::Result<T, TaskError> {
        self.core.meta.wait_done(Some(timeout))?;
        self.collect()
    }

    fn collect(&self) -> std::result::Result<T, TaskError> {
        match self.core.value.lock().as_ref() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(error.clone()),
            // Cancelled before the body ran: no value was ever stored.
            None => Err(TaskError::Cancelled),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.meta.id)
            .field("name", &self.core.meta.name)
            .finish()
    }
}
