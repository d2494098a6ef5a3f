//! Event payload definitions for the event bus.
//!
//! This module defines the event variants organized by category.
//! Payloads are designed to be cloneable and serializable for logging/replay.
//!
//! Listener matching is tag-based: a listener either registers for the
//! catch-all filter and receives every event on its queue, or for a set of
//! categories and receives only events whose variant carries one of those
//! tags. There is no runtime type inspection.

use serde::{Deserialize, Serialize};

/// Root payload enum for all bus events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    /// Component lifecycle transitions
    Lifecycle(LifecycleEvent),
    /// Settings changes
    Settings(SettingChange),
    /// Diagnostic notices and faults
    Diagnostic(DiagnosticEvent),
    /// Application-defined events, matched by category and inspected by name
    Custom {
        /// Application-chosen event name.
        name: String,
        /// Arbitrary structured payload.
        data: serde_json::Value,
    },
}

impl EventKind {
    /// Get the category of this payload
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::Lifecycle(_) => EventCategory::Lifecycle,
            EventKind::Settings(_) => EventCategory::Settings,
            EventKind::Diagnostic(_) => EventCategory::Diagnostic,
            EventKind::Custom { .. } => EventCategory::Custom,
        }
    }

    /// Get a short description of this payload for logging
    pub fn description(&self) -> String {
        match self {
            EventKind::Lifecycle(e) => e.description(),
            EventKind::Settings(e) => e.description(),
            EventKind::Diagnostic(e) => e.description(),
            EventKind::Custom { name, .. } => format!("Custom event '{}'", name),
        }
    }

    /// Create a custom event payload
    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        EventKind::Custom {
            name: name.into(),
            data,
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Component lifecycle events.
    Lifecycle,
    /// Settings change events.
    Settings,
    /// Diagnostic events.
    Diagnostic,
    /// Application-defined events.
    Custom,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Lifecycle => write!(f, "Lifecycle"),
            EventCategory::Settings => write!(f, "Settings"),
            EventCategory::Diagnostic => write!(f, "Diagnostic"),
            EventCategory::Custom => write!(f, "Custom"),
        }
    }
}

/// Component lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// A component finished starting.
    Started {
        /// Name of the component.
        component: String,
    },
    /// A component began an orderly shutdown.
    Stopping {
        /// Name of the component.
        component: String,
    },
    /// A component finished stopping.
    Stopped {
        /// Name of the component.
        component: String,
    },
}

impl LifecycleEvent {
    fn description(&self) -> String {
        match self {
            LifecycleEvent::Started { component } => format!("{} started", component),
            LifecycleEvent::Stopping { component } => format!("{} stopping", component),
            LifecycleEvent::Stopped { component } => format!("{} stopped", component),
        }
    }
}

/// A settings value change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingChange {
    /// Path of the changed setting.
    pub path: String,
    /// Previous value, if any.
    pub old_value: Option<String>,
    /// New value, `None` when the setting was removed.
    pub new_value: Option<String>,
}

impl SettingChange {
    fn description(&self) -> String {
        format!("Setting '{}' changed", self.path)
    }
}

/// Diagnostic events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiagnosticEvent {
    /// An informational notice.
    Notice {
        /// The notice text.
        message: String,
    },
    /// A fault report.
    Fault {
        /// The fault text.
        message: String,
    },
}

impl DiagnosticEvent {
    fn description(&self) -> String {
        match self {
            DiagnosticEvent::Notice { message } => format!("Notice: {}", message),
            DiagnosticEvent::Fault { message } => format!("Fault: {}", message),
        }
    }
}

/// Filter to receive only specific event categories
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Receive all events on the queue.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event category matches this filter
    pub fn matches(&self, category: EventCategory) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&category),
        }
    }

    /// Convenience constructor for a single-category filter
    pub fn category(category: EventCategory) -> Self {
        EventFilter::Categories(vec![category])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        let event = EventKind::Lifecycle(LifecycleEvent::Started {
            component: "bus".to_string(),
        });
        assert_eq!(event.category(), EventCategory::Lifecycle);

        let event = EventKind::custom("ping", serde_json::Value::Null);
        assert_eq!(event.category(), EventCategory::Custom);
    }

    #[test]
    fn test_filter_matches() {
        assert!(EventFilter::All.matches(EventCategory::Settings));
        assert!(EventFilter::category(EventCategory::Settings).matches(EventCategory::Settings));
        assert!(!EventFilter::category(EventCategory::Settings).matches(EventCategory::Custom));
        assert!(
            EventFilter::Categories(vec![EventCategory::Lifecycle, EventCategory::Diagnostic])
                .matches(EventCategory::Diagnostic)
        );
    }

    #[test]
    fn test_payload_serialization() {
        let change = SettingChange {
            path: "task-manager/thread-count".to_string(),
            old_value: Some("8".to_string()),
            new_value: Some("16".to_string()),
        };
        let json = serde_json::to_string(&EventKind::Settings(change)).unwrap();
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back.category(), EventCategory::Settings);
    }
}
