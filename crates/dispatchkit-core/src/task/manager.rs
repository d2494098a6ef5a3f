//! Managed task execution.
//!
//! The [`TaskManager`] owns a bounded worker pool backed by a shared
//! unbounded queue, tracks in-flight tasks, publishes lifecycle
//! notifications to registered listeners, and supports synchronous
//! invocation. Invoked from one of its own worker threads, a task runs
//! inline on the calling thread instead of queueing; that inline path is
//! what keeps a saturated pool from deadlocking when a running task needs
//! a helper task finished before it can proceed.

use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::event::{TaskEvent, TaskEventKind, TaskListener};
use super::pool::{PoolHandle, WorkerPool};
use super::task::{Task, TaskContext, TaskHandle};
use crate::error::{panic_message, TaskError};
use crate::settings::SettingsStore;

/// Settings path under which the configured thread count is persisted.
const THREAD_COUNT_PATH: &str = "task-manager/thread-count";

/// Worker pool sizing and keep-alive configuration
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Minimum number of worker threads, prestarted and kept alive.
    pub min_threads: usize,
    /// Maximum number of worker threads.
    pub max_threads: usize,
    /// How long an idle thread above the minimum lingers before exiting.
    pub keep_alive: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(TaskManager::MIN_THREAD_COUNT);
        let min_threads = cpus.max(TaskManager::MIN_THREAD_COUNT);
        let max_threads = (cpus * 2).max(min_threads);
        Self {
            min_threads,
            max_threads,
            keep_alive: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct PoolState {
    pool: Option<WorkerPool>,
    draining: Option<PoolHandle>,
}

struct ManagerShared {
    config: Mutex<TaskManagerConfig>,
    pool: Mutex<PoolState>,
    tasks: RwLock<Vec<TaskHandle>>,
    listeners: RwLock<Vec<Arc<dyn TaskListener>>>,
    settings: Mutex<Option<Arc<dyn SettingsStore>>>,
}

/// Bounded-pool task executor with lifecycle tracking
///
/// Cloning a `TaskManager` clones a handle to the same manager. The
/// manager is either fully stopped (no pool) or fully running; no partial
/// state is observable.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<ManagerShared>,
}

impl TaskManager {
    /// Lower clamp bound for [`set_thread_count`](TaskManager::set_thread_count)
    pub const MIN_THREAD_COUNT: usize = 4;

    /// Upper clamp bound for [`set_thread_count`](TaskManager::set_thread_count)
    pub const MAX_THREAD_COUNT: usize = 32;

    /// Create a stopped manager with default sizing
    pub fn new() -> Self {
        Self::with_config(TaskManagerConfig::default())
    }

    /// Create a stopped manager with explicit sizing
    ///
    /// The configuration is normalized so that
    /// `1 <= min_threads <= max_threads` always holds.
    pub fn with_config(config: TaskManagerConfig) -> Self {
        let min_threads = config.min_threads.max(1);
        let max_threads = config.max_threads.max(min_threads);
        Self {
            shared: Arc::new(ManagerShared {
                config: Mutex::new(TaskManagerConfig {
                    min_threads,
                    max_threads,
                    keep_alive: config.keep_alive,
                }),
                pool: Mutex::new(PoolState::default()),
                tasks: RwLock::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                settings: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current sizing configuration
    pub fn config(&self) -> TaskManagerConfig {
        self.shared.config.lock().clone()
    }

    /// Start the worker pool
    ///
    /// Idempotent: a running manager is left alone.
    pub fn start(&self) {
        let config = self.shared.config.lock().clone();
        let mut state = self.shared.pool.lock();
        if state.pool.is_some() {
            return;
        }
        tracing::trace!(
            min = config.min_threads,
            max = config.max_threads,
            "task manager thread counts"
        );
        state.pool = Some(WorkerPool::new(
            config.min_threads,
            config.max_threads,
            config.keep_alive,
        ));
    }

    /// Start and wait for the pool to accept work
    ///
    /// Worker threads are prestarted synchronously, so this is equivalent
    /// to [`start`](TaskManager::start).
    pub fn start_and_wait(&self) {
        self.start();
    }

    /// Begin an orderly shutdown
    ///
    /// No new tasks are accepted; queued-but-unstarted tasks still run to
    /// completion and running tasks finish. Idempotent.
    pub fn stop(&self) {
        let mut state = self.shared.pool.lock();
        if let Some(pool) = state.pool.take() {
            tracing::debug!("task manager stopping");
            state.draining = Some(pool.shutdown());
        }
    }

    /// Stop and block until the shutdown completes or the timeout elapses
    ///
    /// Fails fast with [`TaskError::WouldDeadlock`] when called from one
    /// of this pool's own worker threads.
    pub fn stop_and_wait(&self, timeout: Option<Duration>) -> Result<(), TaskError> {
        if self.is_worker_thread() {
            return Err(TaskError::WouldDeadlock {
                reason: "stop_and_wait called from a worker thread of this pool".to_string(),
            });
        }
        self.stop();
        let handle = self.shared.pool.lock().draining.take();
        if let Some(handle) = handle {
            if !handle.await_termination(timeout) {
                // Keep the handle so a later call can continue waiting.
                self.shared.pool.lock().draining = Some(handle);
                return Err(TaskError::Timeout {
                    timeout_ms: timeout.unwrap_or_default().as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Synchronous stop-and-wait followed by start
    pub fn restart(&self) -> Result<(), TaskError> {
        self.stop_and_wait(None)?;
        self.start_and_wait();
        Ok(())
    }

    /// Whether the manager is accepting work
    pub fn is_running(&self) -> bool {
        self.shared.pool.lock().pool.is_some()
    }

    /// Number of live worker threads; zero when stopped
    pub fn thread_count(&self) -> usize {
        self.shared
            .pool
            .lock()
            .pool
            .as_ref()
            .map_or(0, WorkerPool::thread_count)
    }

    /// Reconfigure the pool size
    ///
    /// `count` is clamped into `[MIN_THREAD_COUNT, MAX_THREAD_COUNT]` and
    /// becomes the maximum; the minimum is recomputed as half of it. The
    /// new count is persisted through the attached settings store, and a
    /// running manager is synchronously restarted so the size takes
    /// effect immediately. Fails fast with [`TaskError::WouldDeadlock`]
    /// when called from one of this pool's worker threads.
    pub fn set_thread_count(&self, count: usize) -> Result<(), TaskError> {
        if self.is_worker_thread() {
            return Err(TaskError::WouldDeadlock {
                reason: "set_thread_count called from a worker thread of this pool".to_string(),
            });
        }
        let (min_threads, max_threads) = Self::clamp_thread_counts(count);
        {
            let mut config = self.shared.config.lock();
            config.min_threads = min_threads;
            config.max_threads = max_threads;
        }
        self.save_settings();
        if self.is_running() {
            self.restart()?;
        }
        Ok(())
    }

    /// Clamp a requested thread count into pool bounds.
    ///
    /// Returns `(min, max)`: the maximum is the clamped request, the
    /// minimum half of it, floored at [`MIN_THREAD_COUNT`](Self::MIN_THREAD_COUNT).
    pub fn clamp_thread_counts(count: usize) -> (usize, usize) {
        let count = count.min(Self::MAX_THREAD_COUNT);
        let min = Self::MIN_THREAD_COUNT.max(count / 2);
        let max = Self::MAX_THREAD_COUNT.min(min.max(count));
        (min, max)
    }

    /// Attach a settings store and apply the persisted thread count
    ///
    /// Absence of a persisted value leaves the current configuration in
    /// place. Running without any store is valid; persistence is simply
    /// disabled.
    pub fn load_settings(&self, store: Arc<dyn SettingsStore>) {
        let current = self.shared.config.lock().max_threads;
        let stored = store.get_int(THREAD_COUNT_PATH, current as i64).max(0) as usize;
        *self.shared.settings.lock() = Some(store);

        let (min_threads, max_threads) = Self::clamp_thread_counts(stored);
        let mut config = self.shared.config.lock();
        config.min_threads = min_threads;
        config.max_threads = max_threads;
    }

    /// Persist the configured thread count through the attached store
    pub fn save_settings(&self) {
        let store = self.shared.settings.lock().clone();
        if let Some(store) = store {
            let max_threads = self.shared.config.lock().max_threads;
            store.put_int(THREAD_COUNT_PATH, max_threads as i64);
        }
    }

    /// Asynchronously submit a task
    ///
    /// Requires the manager to be running. The task itself is the handle
    /// for polling and joining.
    pub fn submit<T: Send + 'static>(&self, task: &Task<T>) -> Result<(), TaskError> {
        self.submit_handle(&task.handle())
    }

    /// Asynchronously submit a type-erased task
    pub fn submit_handle(&self, task: &TaskHandle) -> Result<(), TaskError> {
        let pool = self.running_pool()?;
        self.submitted(task);
        if task.is_done() {
            // Cancelled before submission; nothing will ever run it.
            self.completed(task);
            return Ok(());
        }

        let manager = self.clone();
        let job_task = task.clone();
        pool.execute(Box::new(move || {
            let ctx = TaskContext::new(job_task.clone(), Some(manager));
            job_task.run(&ctx);
        }));
        Ok(())
    }

    /// Asynchronously submit a batch of tasks, in order
    pub fn submit_all(&self, tasks: &[TaskHandle]) -> Result<(), TaskError> {
        for task in tasks {
            self.submit_handle(task)?;
        }
        Ok(())
    }

    /// Synchronously execute a task and return its value
    ///
    /// From one of this pool's worker threads the task runs inline on the
    /// calling thread, bypassing the queue; otherwise it is submitted
    /// normally and the caller blocks until it completes. Both paths
    /// produce the same state transitions and notifications.
    pub fn invoke<T: Clone + Send + 'static>(&self, task: &Task<T>) -> Result<T, TaskError> {
        let pool = self.running_pool()?;
        if pool.is_worker_thread() {
            self.run_inline(&task.handle());
        } else {
            self.submit_handle(&task.handle())?;
        }
        task.join()
    }

    /// Like [`invoke`](TaskManager::invoke) with a deadline on the wait
    ///
    /// On expiry the task keeps running in the background.
    pub fn invoke_timeout<T: Clone + Send + 'static>(
        &self,
        task: &Task<T>,
        timeout: Duration,
    ) -> Result<T, TaskError> {
        let pool = self.running_pool()?;
        if pool.is_worker_thread() {
            self.run_inline(&task.handle());
            task.join()
        } else {
            self.submit_handle(&task.handle())?;
            task.join_timeout(timeout)
        }
    }

    /// Synchronously execute a batch of tasks
    ///
    /// From a worker thread the batch runs sequentially inline; otherwise
    /// every task is submitted and the caller blocks until all finish.
    /// Individual task failures are reported through each task's own
    /// handle, not through this call.
    pub fn invoke_all(&self, tasks: &[TaskHandle]) -> Result<(), TaskError> {
        let pool = self.running_pool()?;
        if pool.is_worker_thread() {
            for task in tasks {
                self.run_inline(task);
            }
            return Ok(());
        }
        self.submit_all(tasks)?;
        for task in tasks {
            task.wait();
        }
        Ok(())
    }

    /// Like [`invoke_all`](TaskManager::invoke_all) with an overall deadline
    ///
    /// On expiry returns [`TaskError::Timeout`] and the remaining tasks
    /// keep running.
    pub fn invoke_all_timeout(
        &self,
        tasks: &[TaskHandle],
        timeout: Duration,
    ) -> Result<(), TaskError> {
        let pool = self.running_pool()?;
        if pool.is_worker_thread() {
            for task in tasks {
                self.run_inline(task);
            }
            return Ok(());
        }
        self.submit_all(tasks)?;
        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;
        for task in tasks {
            let now = Instant::now();
            if now >= deadline {
                return Err(TaskError::Timeout { timeout_ms });
            }
            if task.wait_timeout(deadline - now).is_err() {
                return Err(TaskError::Timeout { timeout_ms });
            }
        }
        Ok(())
    }

    /// Snapshot of the in-flight task set
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.shared.tasks.read().clone()
    }

    /// Register a manager-level listener (`Submitted`, `Completed`)
    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        let mut listeners = self.shared.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a manager-level listener; absent listeners are a no-op
    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) {
        self.shared
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Completion bookkeeping, called by the task's execution wrapper on
    /// any terminal transition.
    pub(crate) fn completed(&self, task: &TaskHandle) {
        self.fire(TaskEvent::new(task.clone(), TaskEventKind::Completed));
        task.set_manager(None);
        let id = task.id();
        self.shared.tasks.write().retain(|t| t.id() != id);
    }

    fn running_pool(&self) -> Result<WorkerPool, TaskError> {
        self.shared
            .pool
            .lock()
            .pool
            .clone()
            .ok_or(TaskError::NotRunning)
    }

    fn is_worker_thread(&self) -> bool {
        let state = self.shared.pool.lock();
        state
            .pool
            .as_ref()
            .is_some_and(WorkerPool::is_worker_thread)
            || state
                .draining
                .as_ref()
                .is_some_and(PoolHandle::is_worker_thread)
    }

    fn submitted(&self, task: &TaskHandle) {
        task.set_manager(Some(self.clone()));
        self.shared.tasks.write().push(task.clone());
        self.fire(TaskEvent::new(task.clone(), TaskEventKind::Submitted));
    }

    fn run_inline(&self, task: &TaskHandle) {
        self.submitted(task);
        if task.is_done() {
            self.completed(task);
            return;
        }
        let ctx = TaskContext::new(task.clone(), Some(self.clone()));
        task.run(&ctx);
    }

    /// Notify manager-level listeners, swallowing panics so bookkeeping
    /// never corrupts.
    fn fire(&self, event: TaskEvent) {
        let listeners: Vec<_> = self.shared.listeners.read().iter().cloned().collect();
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_task_event(&event))) {
                tracing::error!(
                    task = %event.task().name(),
                    kind = %event.kind(),
                    panic = panic_message(panic.as_ref()),
                    "task listener panicked"
                );
            }
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("running", &self.is_running())
            .field("tasks", &self.shared.tasks.read().len())
            .finish()
    }
}
