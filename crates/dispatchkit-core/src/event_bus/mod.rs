//! # Event Bus Module
//!
//! Publish/subscribe event delivery with prioritized, named queues and
//! single-dispatcher-thread semantics.
//!
//! ## Overview
//!
//! - Producers submit [`Event`]s to named queues without blocking
//! - One dispatch thread per bus drains all queues, one event per queue
//!   per cycle, highest priority first with FIFO tie-break
//! - Listeners register per queue, for all events or for a set of
//!   [`EventCategory`] tags, and run synchronously on the dispatch thread
//! - Callers may block on an event's completion signal with [`Event::wait`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dispatchkit_core::event_bus::{Event, EventBus, EventFilter, EventKind};
//!
//! let bus = EventBus::new();
//! bus.add_listener(std::sync::Arc::new(|event: &Event| {
//!     println!("event: {}", event);
//! }));
//! bus.start();
//!
//! let event = Event::new(EventKind::custom("ping", serde_json::json!({})), "example");
//! bus.submit(event.clone());
//! event.wait()?;
//! ```

mod bus;
mod event;
mod events;

pub use bus::{EventBus, EventListener};
pub use event::Event;
pub use events::{
    DiagnosticEvent, EventCategory, EventFilter, EventKind, LifecycleEvent, SettingChange,
};
