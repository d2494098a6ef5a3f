//! Aggregation of child tasks under a single parent.
//!
//! A [`CompositeTask`] is an ordinary [`Task`] whose body submits a fixed
//! set of child tasks to the owning manager and waits for all of them.
//! Individual child failures are intentionally ignored: the parent still
//! completes successfully, and per-child results stay available through
//! each child's own handle.
//!
//! Progress is additive: the parent's ceiling is the sum of the child
//! ranges, and every child `Progress` notification recomputes the
//! parent's progress as the sum of child progress values.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use super::event::{TaskEvent, TaskEventKind, TaskListener};
use super::task::{ManagedTask, Task, TaskContext, TaskHandle};
use crate::error::{Error, Result};

/// A task that runs a collection of child tasks and aggregates progress
pub struct CompositeTask {
    task: Task<()>,
    children: Arc<Mutex<Vec<TaskHandle>>>,
    aggregator: Arc<dyn TaskListener>,
}

impl CompositeTask {
    /// Create an empty composite
    pub fn new(name: impl Into<String>) -> Self {
        let children: Arc<Mutex<Vec<TaskHandle>>> = Arc::new(Mutex::new(Vec::new()));

        let body_children = Arc::clone(&children);
        let task = Task::new(name, move |ctx| run_children(&body_children, ctx));
        task.set_total(0);

        let aggregator: Arc<dyn TaskListener> = Arc::new(ProgressAggregator {
            children: Arc::clone(&children),
            parent: task.handle().downgrade(),
        });

        Self {
            task,
            children,
            aggregator,
        }
    }

    /// Create a composite over an initial set of children
    pub fn with_children(name: impl Into<String>, children: Vec<TaskHandle>) -> Self {
        let composite = Self::new(name);
        for child in children {
            composite.add_child(child);
        }
        composite
    }

    /// Add a child task; its progress range joins the parent's total
    pub fn add_child(&self, child: TaskHandle) {
        child.add_listener(Arc::clone(&self.aggregator));
        self.children.lock().push(child);
        self.refresh_total();
    }

    /// Remove a child task; absent children are a no-op
    pub fn remove_child(&self, child: &TaskHandle) {
        child.remove_listener(&self.aggregator);
        let id = child.id();
        self.children.lock().retain(|c| c.id() != id);
        self.refresh_total();
    }

    /// The parent task; submit this to a manager to run the composite
    pub fn task(&self) -> &Task<()> {
        &self.task
    }

    /// Type-erased handle to the parent task
    pub fn handle(&self) -> TaskHandle {
        self.task.handle()
    }

    /// Snapshot of the child set
    pub fn children(&self) -> Vec<TaskHandle> {
        self.children.lock().clone()
    }

    fn refresh_total(&self) {
        let children = self.children.lock();
        let total: u64 = children
            .iter()
            .map(|c| c.maximum().saturating_sub(c.minimum()))
            .sum();
        self.task.set_total(total);
    }
}

impl std::fmt::Debug for CompositeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTask")
            .field("name", &self.task.name())
            .field("children", &self.children.lock().len())
            .finish()
    }
}

fn run_children(children: &Arc<Mutex<Vec<TaskHandle>>>, ctx: &TaskContext) -> Result<()> {
    let manager = ctx
        .manager()
        .cloned()
        .ok_or_else(|| Error::other("composite task requires an owning task manager"))?;

    let children: Vec<TaskHandle> = children.lock().clone();
    for child in &children {
        manager.submit_handle(child)?;
    }
    for child in &children {
        // Child failures are intentionally ignored; each child's handle
        // carries its own classification.
        child.wait();
    }
    Ok(())
}

struct ProgressAggregator {
    children: Arc<Mutex<Vec<TaskHandle>>>,
    parent: Weak<dyn ManagedTask>,
}

impl TaskListener for ProgressAggregator {
    fn on_task_event(&self, event: &TaskEvent) {
        if event.kind() != TaskEventKind::Progress {
            return;
        }
        let Some(parent) = self.parent.upgrade() else {
            return;
        };
        let sum: u64 = self.children.lock().iter().map(|c| c.progress()).sum();
        TaskHandle::from_arc(parent).set_progress(sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::manager::{TaskManager, TaskManagerConfig};
    use crate::task::task::TaskOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager() -> TaskManager {
        let manager = TaskManager::with_config(TaskManagerConfig {
            min_threads: 4,
            max_threads: 4,
            keep_alive: Duration::from_millis(100),
        });
        manager.start_and_wait();
        manager
    }

    fn reporting_child(name: &str, units: u64, counter: Arc<AtomicUsize>) -> Task<()> {
        let task = Task::new(name.to_string(), move |ctx: &TaskContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.set_progress(units);
            Ok(())
        });
        task.set_total(units);
        task
    }

    #[test]
    fn test_children_all_execute() {
        let manager = manager();
        let counter = Arc::new(AtomicUsize::new(0));

        let a = reporting_child("a", 10, counter.clone());
        let b = reporting_child("b", 10, counter.clone());
        let composite = CompositeTask::with_children("parent", vec![a.handle(), b.handle()]);

        manager.submit(composite.task()).unwrap();
        composite.task().join_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(a.outcome(), TaskOutcome::Success);
        assert_eq!(b.outcome(), TaskOutcome::Success);

        manager.stop_and_wait(None).unwrap();
    }

    #[test]
    fn test_parent_succeeds_despite_child_failure() {
        let manager = manager();

        let good = Task::new("good", |_ctx| Ok(()));
        let bad: Task<()> = Task::new("bad", |_ctx| Err(Error::other("child failure")));
        let composite = CompositeTask::with_children("parent", vec![good.handle(), bad.handle()]);

        manager.submit(composite.task()).unwrap();
        composite.task().join_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(composite.task().outcome(), TaskOutcome::Success);
        assert_eq!(bad.outcome(), TaskOutcome::Failed);

        manager.stop_and_wait(None).unwrap();
    }

    #[test]
    fn test_additive_progress() {
        let manager = manager();
        let counter = Arc::new(AtomicUsize::new(0));

        let a = reporting_child("a", 10, counter.clone());
        let b = reporting_child("b", 15, counter.clone());
        let composite = CompositeTask::with_children("parent", vec![a.handle(), b.handle()]);
        assert_eq!(composite.handle().maximum(), 25);

        manager.submit(composite.task()).unwrap();
        composite.task().join_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(composite.handle().progress(), 25);

        manager.stop_and_wait(None).unwrap();
    }

    #[test]
    fn test_remove_child_shrinks_total() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = reporting_child("a", 10, counter.clone());
        let b = reporting_child("b", 5, counter);

        let composite = CompositeTask::with_children("parent", vec![a.handle(), b.handle()]);
        assert_eq!(composite.handle().maximum(), 15);

        composite.remove_child(&b.handle());
        assert_eq!(composite.handle().maximum(), 10);
        assert_eq!(composite.children().len(), 1);
    }
}
