//! Error handling for settings persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Settings error type
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Underlying file I/O failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The settings document could not be parsed
    #[error("Failed to parse {path}: {reason}")]
    Parse {
        /// The file being parsed.
        path: PathBuf,
        /// Why parsing failed.
        reason: String,
    },

    /// The settings document could not be serialized
    #[error("Failed to serialize settings: {reason}")]
    Serialize {
        /// Why serialization failed.
        reason: String,
    },

    /// The file extension maps to no supported format
    #[error("Unsupported settings format: {extension}")]
    UnsupportedFormat {
        /// The offending file extension.
        extension: String,
    },

    /// A configuration value failed validation
    #[error("Invalid configuration: {reason}")]
    Invalid {
        /// Why the configuration is invalid.
        reason: String,
    },

    /// No file path is associated with the store
    #[error("No settings file path configured")]
    NoPath,
}

/// Result type using SettingsError
pub type Result<T> = std::result::Result<T, SettingsError>;
