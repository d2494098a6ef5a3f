//! Event bus implementation.
//!
//! Provides the core EventBus struct: named priority queues drained by a
//! single dispatch thread, and a listener registry keyed by queue name and
//! event filter.
//!
//! Queue mutation is guarded by one coarse lock shared across all queues of
//! a bus so the global pending count stays consistent. Listener invocation
//! happens outside any lock, so a listener may itself submit events or
//! register listeners without deadlocking.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use super::event::Event;
use super::events::EventFilter;
use crate::error::{panic_message, EventError};

/// Listener callback interface
///
/// Implemented for any `Fn(&Event)` closure via the blanket impl. A
/// listener runs synchronously on the dispatch thread; a slow listener
/// delays delivery for every queue of the bus.
pub trait EventListener: Send + Sync {
    /// Called with each matching event
    fn on_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// An event queued for delivery; orders by priority, FIFO among equals.
struct QueuedEvent {
    priority: u8,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct Registration {
    filter: EventFilter,
    listener: Arc<dyn EventListener>,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<String, BinaryHeap<QueuedEvent>>,
    pending: usize,
    next_seq: u64,
}

pub(crate) struct BusShared {
    state: Mutex<QueueState>,
    pending_signal: Condvar,
    listeners: RwLock<HashMap<String, Vec<Registration>>>,
    running: AtomicBool,
    dispatch_thread: Mutex<Option<ThreadId>>,
}

impl BusShared {
    pub(crate) fn is_dispatch_thread(&self) -> bool {
        *self.dispatch_thread.lock() == Some(std::thread::current().id())
    }
}

/// Publish/subscribe event bus with prioritized, per-queue delivery
///
/// A bus owns one or more independent named queues and exactly one
/// dispatch thread that drains all of them. Each dispatch cycle delivers
/// at most one event per queue, so a busy queue cannot starve the others.
///
/// Events may be submitted before [`start`](EventBus::start); they are
/// buffered and delivered once the bus runs. Events still queued at
/// [`stop`](EventBus::stop) are dropped with the dispatch thread.
pub struct EventBus {
    shared: Arc<BusShared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Name of the queue used when none is specified
    pub const DEFAULT_QUEUE: &'static str = "default";

    /// Create a new, stopped event bus
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                state: Mutex::new(QueueState::default()),
                pending_signal: Condvar::new(),
                listeners: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                dispatch_thread: Mutex::new(None),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatch thread
    ///
    /// Idempotent: a running bus is left alone.
    pub fn start(&self) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("event-dispatch".to_string())
            .spawn(move || dispatch_loop(shared))
            .expect("failed to spawn event dispatch thread");
        *dispatcher = Some(handle);
    }

    /// Stop the dispatch thread and wait for it to exit
    ///
    /// Idempotent. Events still queued are dropped; their waiters are not
    /// released, matching the delivery guarantee being scoped to a running
    /// bus.
    pub fn stop(&self) {
        let handle = {
            let mut dispatcher = self.dispatcher.lock();
            self.shared.running.store(false, Ordering::SeqCst);
            // Wake the dispatch thread so it can observe the stop.
            let _state = self.shared.state.lock();
            self.shared.pending_signal.notify_all();
            dispatcher.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Check whether the dispatch thread is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Submit an event to the default queue
    pub fn submit(&self, event: Event) {
        self.submit_to(Self::DEFAULT_QUEUE, event);
    }

    /// Submit an event to the named queue
    ///
    /// Never blocks the caller. The queue is created lazily on first use.
    /// The event's priority is captured at this point; later priority
    /// changes do not affect ordering.
    pub fn submit_to(&self, queue: &str, event: Event) {
        event.attach(&self.shared);

        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = QueuedEvent {
            priority: event.priority(),
            seq,
            event,
        };
        state.queues.entry(queue.to_string()).or_default().push(entry);
        state.pending += 1;
        self.shared.pending_signal.notify_one();
    }

    /// Register a listener for every event on the default queue
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.add_listener_to(Self::DEFAULT_QUEUE, EventFilter::All, listener);
    }

    /// Register a listener on the named queue with a filter
    ///
    /// Registering the same listener twice for the same queue and filter is
    /// idempotent. No delivery order is guaranteed among the listeners of
    /// one event.
    pub fn add_listener_to(
        &self,
        queue: &str,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) {
        let mut listeners = self.shared.listeners.write();
        let registrations = listeners.entry(queue.to_string()).or_default();
        let duplicate = registrations
            .iter()
            .any(|r| r.filter == filter && Arc::ptr_eq(&r.listener, &listener));
        if !duplicate {
            registrations.push(Registration { filter, listener });
            tracing::debug!(queue, "event listener added");
        }
    }

    /// Remove a listener registered on the default queue with the catch-all
    /// filter
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.remove_listener_from(Self::DEFAULT_QUEUE, &EventFilter::All, listener);
    }

    /// Remove a listener registration; absent listeners are a no-op
    pub fn remove_listener_from(
        &self,
        queue: &str,
        filter: &EventFilter,
        listener: &Arc<dyn EventListener>,
    ) {
        let mut listeners = self.shared.listeners.write();
        if let Some(registrations) = listeners.get_mut(queue) {
            registrations.retain(|r| !(r.filter == *filter && Arc::ptr_eq(&r.listener, listener)));
        }
    }

    /// Number of listener registrations on the named queue
    pub fn listener_count(&self, queue: &str) -> usize {
        self.shared
            .listeners
            .read()
            .get(queue)
            .map_or(0, |registrations| registrations.len())
    }

    /// Wait until every event currently queued on the default queue has
    /// been delivered
    pub fn flush(&self) -> Result<(), EventError> {
        self.flush_queue(Self::DEFAULT_QUEUE)
    }

    /// Wait until every event currently queued on the named queue has been
    /// delivered
    ///
    /// Submits a marker event at the lowest priority and waits for it. A
    /// no-op when called from the dispatch thread.
    pub fn flush_queue(&self, queue: &str) -> Result<(), EventError> {
        if self.shared.is_dispatch_thread() {
            return Ok(());
        }
        let marker = Event::new(
            super::events::EventKind::custom("dispatchkit/flush", serde_json::Value::Null),
            "event-bus",
        )
        .with_priority(Event::LOWEST_PRIORITY);
        self.submit_to(queue, marker.clone());
        marker.wait()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("running", &self.is_running())
            .field("pending", &self.shared.state.lock().pending)
            .finish()
    }
}

fn dispatch_loop(shared: Arc<BusShared>) {
    *shared.dispatch_thread.lock() = Some(std::thread::current().id());

    loop {
        let batch = {
            let mut state = shared.state.lock();
            while shared.running.load(Ordering::SeqCst) && state.pending == 0 {
                shared.pending_signal.wait(&mut state);
            }
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            select_batch(&mut state)
        };

        // Deliver outside the lock so listeners may use the bus.
        for (queue, event) in batch {
            deliver(&shared, &queue, &event);
        }
    }

    *shared.dispatch_thread.lock() = None;
}

/// Pop at most one deliverable event per queue.
///
/// Cancelled events are discarded here, atomically with the dequeue, and
/// still marked processed so waiters wake. Taking one event per queue per
/// cycle keeps a busy queue from starving the others.
fn select_batch(state: &mut QueueState) -> Vec<(String, Event)> {
    let mut batch = Vec::new();
    let pending = &mut state.pending;
    for (name, queue) in state.queues.iter_mut() {
        while let Some(entry) = queue.pop() {
            *pending = pending.saturating_sub(1);
            if entry.event.is_cancelled() {
                tracing::debug!(queue = %name, event = %entry.event, "discarding cancelled event");
                entry.event.mark_processed();
                continue;
            }
            batch.push((name.clone(), entry.event));
            break;
        }
    }
    batch
}

fn deliver(shared: &Arc<BusShared>, queue: &str, event: &Event) {
    tracing::debug!(queue, event = %event, "dispatching event");

    let matched: Vec<Arc<dyn EventListener>> = {
        let listeners = shared.listeners.read();
        listeners
            .get(queue)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| r.filter.matches(event.category()))
                    .map(|r| Arc::clone(&r.listener))
                    .collect()
            })
            .unwrap_or_default()
    };

    for listener in matched {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            tracing::error!(
                queue,
                event = %event,
                panic = panic_message(panic.as_ref()),
                "event listener panicked"
            );
        }
    }

    event.mark_processed();
}
