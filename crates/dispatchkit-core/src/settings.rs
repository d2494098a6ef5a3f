//! Settings collaborator interface
//!
//! The task manager persists its configured thread count through this
//! trait. The core never depends on a concrete settings implementation;
//! `dispatchkit-settings` provides the file-backed one. Running without a
//! store attached is valid and simply disables persistence.

/// Path-keyed settings store
///
/// Paths are `/`-separated strings such as `"task-manager/thread-count"`.
/// Implementations must be safe to share across threads.
pub trait SettingsStore: Send + Sync {
    /// Get an integer value, falling back to `default` when the path is
    /// absent or not an integer.
    fn get_int(&self, path: &str, default: i64) -> i64;

    /// Store an integer value at the given path.
    fn put_int(&self, path: &str, value: i64);
}
