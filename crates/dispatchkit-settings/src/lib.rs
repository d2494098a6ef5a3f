//! Dispatchkit Settings Crate
//!
//! Handles configuration, path-keyed settings storage and file
//! persistence. [`SettingsManager`] implements the core's
//! [`SettingsStore`](dispatchkit_core::SettingsStore) trait, so a task
//! manager can persist its thread count through it.

pub mod config;
pub mod error;
pub mod store;

pub use config::{Config, EventBusSettings, TaskPoolSettings};
pub use error::SettingsError;
pub use store::{SettingValue, SettingsManager};
