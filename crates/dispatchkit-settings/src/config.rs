//! Typed configuration for dispatchkit
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats selected by extension.
//!
//! Configuration is organized into logical sections:
//! - Task pool settings (thread count)
//! - Event bus settings (default queue name)

use serde::{Deserialize, Serialize};
use std::path::Path;

use dispatchkit_core::SettingsStore;

use crate::error::{Result, SettingsError};
use crate::store::SettingsManager;

/// Task pool configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPoolSettings {
    /// Configured maximum worker thread count
    pub thread_count: usize,
}

impl Default for TaskPoolSettings {
    fn default() -> Self {
        Self {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(8),
        }
    }
}

/// Event bus configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    /// Queue used when submissions name none
    pub default_queue: String,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task pool settings.
    #[serde(default)]
    pub task_pool: TaskPoolSettings,
    /// Event bus settings.
    #[serde(default)]
    pub event_bus: EventBusSettings,
}

impl Config {
    /// Load configuration from a JSON or TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|e| SettingsError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?,
            Some("toml") => toml::from_str(&contents).map_err(|e| SettingsError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?,
            other => {
                return Err(SettingsError::UnsupportedFormat {
                    extension: other.unwrap_or("").to_string(),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON or TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let serialized = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::to_string_pretty(self).map_err(|e| SettingsError::Serialize {
                    reason: e.to_string(),
                })?
            }
            Some("toml") => toml::to_string_pretty(self).map_err(|e| SettingsError::Serialize {
                reason: e.to_string(),
            })?,
            other => {
                return Err(SettingsError::UnsupportedFormat {
                    extension: other.unwrap_or("").to_string(),
                })
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, serialized).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.task_pool.thread_count == 0 {
            return Err(SettingsError::Invalid {
                reason: "task_pool.thread_count must be at least 1".to_string(),
            });
        }
        if self.event_bus.default_queue.is_empty() {
            return Err(SettingsError::Invalid {
                reason: "event_bus.default_queue must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Seed a path-keyed store with this configuration's values
    pub fn seed(&self, settings: &SettingsManager) {
        settings.put_int(
            "task-manager/thread-count",
            self.task_pool.thread_count as i64,
        );
        settings.put_str("event-bus/default-queue", &self.event_bus.default_queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.task_pool.thread_count >= 1);
        assert_eq!(config.event_bus.default_queue, "default");
    }

    #[test]
    fn test_validation_rejects_zero_threads() {
        let mut config = Config::default();
        config.task_pool.thread_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.task_pool.thread_count = 12;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.task_pool.thread_count, 12);
    }

    #[test]
    fn test_seed_store() {
        let settings = SettingsManager::new();
        let mut config = Config::default();
        config.task_pool.thread_count = 9;
        config.seed(&settings);

        use dispatchkit_core::SettingsStore;
        assert_eq!(settings.get_int("task-manager/thread-count", 0), 9);
        assert_eq!(
            settings.get_str("event-bus/default-queue").as_deref(),
            Some("default")
        );
    }
}
