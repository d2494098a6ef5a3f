//! Error handling for dispatchkit
//!
//! Provides error types for the two core subsystems:
//! - Event errors (dispatch, waiting, programming-error guards)
//! - Task errors (submission, execution, cancellation, timeouts)
//!
//! All error types use `thiserror` for ergonomic error handling. The
//! subsystem enums are `Clone` so a captured failure can be handed to any
//! number of waiters.

use thiserror::Error;

/// Event subsystem error type
///
/// Represents errors raised by the event bus and by threads waiting on
/// event completion.
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// A blocking wait was attempted on the bus's own dispatch thread
    #[error("The event dispatch thread must not be blocked")]
    DispatchThreadBlocked,

    /// The bus is not running
    #[error("Event bus is not running")]
    NotRunning,

    /// A wait on event completion timed out
    #[error("Timed out after {timeout_ms}ms waiting for event delivery")]
    WaitTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },
}

/// Task subsystem error type
///
/// Represents errors related to task submission, execution and waiting.
/// `Failed` carries the captured failure of a task body and is re-raised
/// to every caller that joins the task.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The task manager has not been started
    #[error("Task manager is not running")]
    NotRunning,

    /// The task was cancelled before it produced a value
    #[error("Task was cancelled")]
    Cancelled,

    /// The task body failed
    #[error("Task failed: {message}")]
    Failed {
        /// The captured failure message.
        message: String,
    },

    /// A wait on task completion timed out; the task keeps running
    #[error("Timed out after {timeout_ms}ms waiting for task completion")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// A blocking administrative call was made from a thread that would
    /// deadlock on it
    #[error("Operation would deadlock: {reason}")]
    WouldDeadlock {
        /// Why the calling thread cannot block on this operation.
        reason: String,
    },
}

impl TaskError {
    /// Create a task failure from a message
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Main error type for dispatchkit
///
/// A unified error type that can represent any error from both subsystems.
#[derive(Error, Debug)]
pub enum Error {
    /// Event subsystem error
    #[error(transparent)]
    Event(#[from] EventError),

    /// Task subsystem error
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Task(TaskError::Timeout { .. }) | Error::Event(EventError::WaitTimeout { .. })
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(format!("{error:#}"))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
