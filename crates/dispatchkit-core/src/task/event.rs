//! Task lifecycle notifications.
//!
//! The task manager and individual tasks publish [`TaskEvent`]s to
//! registered [`TaskListener`]s. Task-level listeners receive `Start`,
//! `Progress` and `Finish`; manager-level listeners receive `Submitted`
//! and `Completed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskHandle;

/// Kind of a task lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskEventKind {
    /// The task was handed to a manager.
    Submitted,
    /// The task body is about to run.
    Start,
    /// The task reported progress.
    Progress,
    /// The task reached its terminal state.
    Finish,
    /// The manager finished its completion bookkeeping for the task.
    Completed,
}

impl std::fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskEventKind::Submitted => write!(f, "Submitted"),
            TaskEventKind::Start => write!(f, "Start"),
            TaskEventKind::Progress => write!(f, "Progress"),
            TaskEventKind::Finish => write!(f, "Finish"),
            TaskEventKind::Completed => write!(f, "Completed"),
        }
    }
}

/// A task lifecycle notification
#[derive(Clone)]
pub struct TaskEvent {
    task: TaskHandle,
    kind: TaskEventKind,
    timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub(crate) fn new(task: TaskHandle, kind: TaskEventKind) -> Self {
        Self {
            task,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// The task this notification concerns
    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// What happened
    pub fn kind(&self) -> TaskEventKind {
        self.kind
    }

    /// When the notification was created
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl std::fmt::Debug for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEvent")
            .field("task", &self.task.name())
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Listener for task lifecycle notifications
///
/// Implemented for any `Fn(&TaskEvent)` closure via the blanket impl.
/// A panicking listener is caught, logged, and never corrupts task
/// bookkeeping.
pub trait TaskListener: Send + Sync {
    /// Called with each notification
    fn on_task_event(&self, event: &TaskEvent);
}

impl<F> TaskListener for F
where
    F: Fn(&TaskEvent) + Send + Sync,
{
    fn on_task_event(&self, event: &TaskEvent) {
        self(event)
    }
}
