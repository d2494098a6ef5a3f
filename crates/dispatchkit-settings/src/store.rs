//! Path-keyed settings store with file persistence.
//!
//! Values are scalars addressed by `/`-separated paths such as
//! `"task-manager/thread-count"`. The store round-trips to JSON or TOML,
//! selected by file extension, and implements the core's
//! [`SettingsStore`] trait so a [`TaskManager`](dispatchkit_core::TaskManager)
//! can persist its configuration through it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dispatchkit_core::SettingsStore;

use crate::error::{Result, SettingsError};

/// A scalar setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// Text value
    Text(String),
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Bool(value) => write!(f, "{}", value),
            SettingValue::Int(value) => write!(f, "{}", value),
            SettingValue::Float(value) => write!(f, "{}", value),
            SettingValue::Text(value) => write!(f, "{}", value),
        }
    }
}

type ValueMap = BTreeMap<String, SettingValue>;

/// Thread-safe, file-backed settings store
pub struct SettingsManager {
    values: RwLock<ValueMap>,
    path: RwLock<Option<PathBuf>>,
}

impl SettingsManager {
    /// Create an empty in-memory store with no backing file
    pub fn new() -> Self {
        Self {
            values: RwLock::new(ValueMap::new()),
            path: RwLock::new(None),
        }
    }

    /// Create a store backed by `path`, loading it if it exists
    pub fn with_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            read_values(&path)?
        } else {
            ValueMap::new()
        };
        Ok(Self {
            values: RwLock::new(values),
            path: RwLock::new(Some(path)),
        })
    }

    /// Platform default settings file location
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dispatchkit").join("settings.json"))
    }

    /// The backing file, if any
    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    /// Load settings from a file, replacing the current contents and
    /// remembering the path for later saves
    pub fn load_from_file(&self, path: &Path) -> Result<()> {
        let values = read_values(path)?;
        tracing::debug!(path = %path.display(), entries = values.len(), "settings loaded");
        *self.values.write() = values;
        *self.path.write() = Some(path.to_path_buf());
        Ok(())
    }

    /// Save settings to the remembered path
    pub fn save(&self) -> Result<()> {
        let path = self.path().ok_or(SettingsError::NoPath)?;
        self.save_to_file(&path)
    }

    /// Save settings to a file, creating parent directories as needed
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let values = self.values.read().clone();
        let serialized = match extension_of(path) {
            Some("json") => {
                serde_json::to_string_pretty(&values).map_err(|e| SettingsError::Serialize {
                    reason: e.to_string(),
                })?
            }
            Some("toml") => toml::to_string_pretty(&values).map_err(|e| SettingsError::Serialize {
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
        })?;
        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Get a raw value
    pub fn get(&self, path: &str) -> Option<SettingValue> {
        self.values.read().get(path).cloned()
    }

    /// Store a raw value
    pub fn put(&self, path: &str, value: SettingValue) {
        self.values.write().insert(path.to_string(), value);
    }

    /// Remove a value; absent paths are a no-op
    pub fn remove(&self, path: &str) {
        self.values.write().remove(path);
    }

    /// Whether a value exists at the path
    pub fn contains(&self, path: &str) -> bool {
        self.values.read().contains_key(path)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Get a boolean, falling back to `default` on absence or type mismatch
    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.get(path) {
            Some(SettingValue::Bool(value)) => value,
            _ => default,
        }
    }

    /// Store a boolean
    pub fn put_bool(&self, path: &str, value: bool) {
        self.put(path, SettingValue::Bool(value));
    }

    /// Get a float, falling back to `default` on absence or type mismatch
    pub fn get_float(&self, path: &str, default: f64) -> f64 {
        match self.get(path) {
            Some(SettingValue::Float(value)) => value,
            Some(SettingValue::Int(value)) => value as f64,
            _ => default,
        }
    }

    /// Store a float
    pub fn put_float(&self, path: &str, value: f64) {
        self.put(path, SettingValue::Float(value));
    }

    /// Get a string value
    pub fn get_str(&self, path: &str) -> Option<String> {
        match self.get(path) {
            Some(SettingValue::Text(value)) => Some(value),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }

    /// Store a string value
    pub fn put_str(&self, path: &str, value: impl Into<String>) {
        self.put(path, SettingValue::Text(value.into()));
    }
}

impl SettingsStore for SettingsManager {
    fn get_int(&self, path: &str, default: i64) -> i64 {
        match self.get(path) {
            Some(SettingValue::Int(value)) => value,
            _ => default,
        }
    }

    fn put_int(&self, path: &str, value: i64) {
        self.put(path, SettingValue::Int(value));
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager")
            .field("entries", &self.len())
            .field("path", &self.path())
            .finish()
    }
}

fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn read_values(path: &Path) -> Result<ValueMap> {
    let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match extension_of(path) {
        Some("json") => serde_json::from_str(&contents).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Some("toml") => toml::from_str(&contents).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        other => Err(SettingsError::UnsupportedFormat {
            extension: other.unwrap_or("").to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let settings = SettingsManager::new();
        assert_eq!(settings.get_int("missing", 7), 7);

        settings.put_int("task-manager/thread-count", 16);
        settings.put_bool("task-manager/enabled", true);
        settings.put_str("task-manager/name", "primary");
        settings.put_float("task-manager/load-factor", 0.75);

        assert_eq!(settings.get_int("task-manager/thread-count", 0), 16);
        assert!(settings.get_bool("task-manager/enabled", false));
        assert_eq!(
            settings.get_str("task-manager/name").as_deref(),
            Some("primary")
        );
        assert_eq!(settings.get_float("task-manager/load-factor", 0.0), 0.75);

        // Type mismatch falls back to the default.
        assert_eq!(settings.get_int("task-manager/name", 3), 3);
    }

    #[test]
    fn test_remove_and_contains() {
        let settings = SettingsManager::new();
        settings.put_int("a/b", 1);
        assert!(settings.contains("a/b"));

        settings.remove("a/b");
        assert!(!settings.contains("a/b"));
        assert!(settings.is_empty());

        // Removing an absent path is a no-op.
        settings.remove("a/b");
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = SettingsManager::with_file(&path).unwrap();
        settings.put_int("task-manager/thread-count", 12);
        settings.put_str("log/level", "debug");
        settings.save().unwrap();

        let reloaded = SettingsManager::with_file(&path).unwrap();
        assert_eq!(reloaded.get_int("task-manager/thread-count", 0), 12);
        assert_eq!(reloaded.get_str("log/level").as_deref(), Some("debug"));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = SettingsManager::with_file(&path).unwrap();
        settings.put_int("task-manager/thread-count", 6);
        settings.put_bool("diagnostics/verbose", false);
        settings.save().unwrap();

        let reloaded = SettingsManager::with_file(&path).unwrap();
        assert_eq!(reloaded.get_int("task-manager/thread-count", 0), 6);
        assert!(!reloaded.get_bool("diagnostics/verbose", true));
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ini");

        let settings = SettingsManager::new();
        match settings.save_to_file(&path) {
            Err(SettingsError::UnsupportedFormat { extension }) => assert_eq!(extension, "ini"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_save_without_path_fails() {
        let settings = SettingsManager::new();
        assert!(matches!(settings.save(), Err(SettingsError::NoPath)));
    }
}
