//! The event envelope.
//!
//! An [`Event`] wraps a payload with a source label, an optional scope, a
//! delivery priority and the delivery bookkeeping the bus needs: a one-way
//! cancellation flag and a one-shot completion signal that any number of
//! threads may wait on. The bus is the sole producer of the completion
//! signal.
//!
//! Clones of an `Event` share state: cancelling or waiting through any
//! clone observes the same flags.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use super::bus::BusShared;
use super::events::{EventCategory, EventKind};
use crate::error::EventError;

/// An event submitted to an [`EventBus`](super::EventBus).
///
/// Priorities range from [`Event::LOWEST_PRIORITY`] to
/// [`Event::HIGHEST_PRIORITY`] with [`Event::DEFAULT_PRIORITY`] as the
/// default. Priority and cancellation are caller-mutable until submission;
/// after submission only cancellation remains meaningful, and it is honored
/// only if observed before dispatch.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    kind: EventKind,
    source: String,
    scope: Option<String>,
    priority: AtomicU8,
    cancelled: AtomicBool,
    processed: Mutex<bool>,
    completion: Condvar,
    // Set exactly once, at submission.
    bus: OnceLock<Weak<BusShared>>,
}

impl Event {
    /// Highest delivery priority
    pub const HIGHEST_PRIORITY: u8 = 9;

    /// Default delivery priority
    pub const DEFAULT_PRIORITY: u8 = 5;

    /// Lowest delivery priority
    pub const LOWEST_PRIORITY: u8 = 1;

    /// Create an event with the default priority and no scope
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self::with_scope(kind, source, None)
    }

    /// Create an event carrying a scope label
    ///
    /// The bus never filters on the scope; it exists for listener-side
    /// filtering by convention.
    pub fn with_scope(
        kind: EventKind,
        source: impl Into<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(EventInner {
                kind,
                source: source.into(),
                scope,
                priority: AtomicU8::new(Self::DEFAULT_PRIORITY),
                cancelled: AtomicBool::new(false),
                processed: Mutex::new(false),
                completion: Condvar::new(),
                bus: OnceLock::new(),
            }),
        }
    }

    /// Builder-style priority assignment
    pub fn with_priority(self, priority: u8) -> Self {
        self.set_priority(priority);
        self
    }

    /// Get the payload
    pub fn kind(&self) -> &EventKind {
        &self.inner.kind
    }

    /// Get the payload category
    pub fn category(&self) -> EventCategory {
        self.inner.kind.category()
    }

    /// Get the source label
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Get the scope label, if any
    pub fn scope(&self) -> Option<&str> {
        self.inner.scope.as_deref()
    }

    /// Get the delivery priority
    pub fn priority(&self) -> u8 {
        self.inner.priority.load(Ordering::Relaxed)
    }

    /// Set the delivery priority, clamped to the valid range
    ///
    /// Has no effect on ordering once the event has been submitted.
    pub fn set_priority(&self, priority: u8) {
        let priority = priority.clamp(Self::LOWEST_PRIORITY, Self::HIGHEST_PRIORITY);
        self.inner.priority.store(priority, Ordering::Relaxed);
    }

    /// Cancel the event
    ///
    /// One-way: a cancelled event never becomes uncancelled. Cancellation
    /// is honored only if the dispatch thread observes it before delivery.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Wake waiters so they can observe the cancellation.
        let _processed = self.inner.processed.lock();
        self.inner.completion.notify_all();
    }

    /// Check whether the event has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Check whether the event has been processed
    ///
    /// One-way: once true it never reverts. Discarded cancelled events are
    /// also marked processed.
    pub fn is_processed(&self) -> bool {
        *self.inner.processed.lock()
    }

    /// Wait for the event to be processed
    ///
    /// Returns immediately if the event was cancelled. Fails fast with
    /// [`EventError::DispatchThreadBlocked`] when called from the owning
    /// bus's dispatch thread, which would deadlock.
    pub fn wait(&self) -> Result<(), EventError> {
        self.check_dispatch_thread()?;

        let mut processed = self.inner.processed.lock();
        while !*processed {
            if self.is_cancelled() {
                return Ok(());
            }
            self.inner.completion.wait(&mut processed);
        }
        Ok(())
    }

    /// Wait for the event to be processed, giving up after `timeout`
    ///
    /// On expiry returns [`EventError::WaitTimeout`]; the event stays
    /// queued and will still be delivered.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), EventError> {
        self.check_dispatch_thread()?;

        let deadline = Instant::now() + timeout;
        let mut processed = self.inner.processed.lock();
        while !*processed {
            if self.is_cancelled() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline
                || self
                    .inner
                    .completion
                    .wait_for(&mut processed, deadline - now)
                    .timed_out()
            {
                if *processed {
                    break;
                }
                return Err(EventError::WaitTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Attach the owning bus. Called once by the bus at submission.
    pub(crate) fn attach(&self, bus: &Arc<BusShared>) {
        let _ = self.inner.bus.set(Arc::downgrade(bus));
    }

    /// Mark the event processed and wake every waiter.
    pub(crate) fn mark_processed(&self) {
        let mut processed = self.inner.processed.lock();
        *processed = true;
        self.inner.completion.notify_all();
    }

    fn check_dispatch_thread(&self) -> Result<(), EventError> {
        if let Some(bus) = self.inner.bus.get().and_then(Weak::upgrade) {
            if bus.is_dispatch_thread() {
                return Err(EventError::DispatchThreadBlocked);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("scope", &self.inner.scope)
            .field("priority", &self.priority())
            .field("cancelled", &self.is_cancelled())
            .field("processed", &self.is_processed())
            .finish()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.kind.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::DiagnosticEvent;

    fn notice(message: &str) -> Event {
        Event::new(
            EventKind::Diagnostic(DiagnosticEvent::Notice {
                message: message.to_string(),
            }),
            "test",
        )
    }

    #[test]
    fn test_priority_clamping() {
        let event = notice("a");
        assert_eq!(event.priority(), Event::DEFAULT_PRIORITY);

        event.set_priority(0);
        assert_eq!(event.priority(), Event::LOWEST_PRIORITY);

        event.set_priority(200);
        assert_eq!(event.priority(), Event::HIGHEST_PRIORITY);

        let event = notice("b").with_priority(7);
        assert_eq!(event.priority(), 7);
    }

    #[test]
    fn test_cancellation_is_one_way() {
        let event = notice("a");
        assert!(!event.is_cancelled());
        event.cancel();
        assert!(event.is_cancelled());
    }

    #[test]
    fn test_wait_returns_on_cancelled_event() {
        let event = notice("a");
        event.cancel();
        // Never submitted, but cancellation still releases waiters.
        event.wait().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let event = notice("a");
        let result = event.wait_timeout(Duration::from_millis(10));
        assert!(matches!(result, Err(EventError::WaitTimeout { .. })));
    }

    #[test]
    fn test_clones_share_state() {
        let event = notice("a");
        let clone = event.clone();
        clone.cancel();
        assert!(event.is_cancelled());
    }
}
