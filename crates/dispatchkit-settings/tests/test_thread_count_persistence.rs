use dispatchkit_core::{TaskManager, TaskManagerConfig};
use dispatchkit_settings::SettingsManager;
use std::sync::Arc;
use std::time::Duration;

fn manager() -> TaskManager {
    TaskManager::with_config(TaskManagerConfig {
        min_threads: 1,
        max_threads: 2,
        keep_alive: Duration::from_millis(100),
    })
}

#[test]
fn test_thread_count_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    // First run: configure and persist.
    {
        let store = Arc::new(SettingsManager::with_file(&path).unwrap());
        let manager = manager();
        manager.load_settings(store.clone());
        manager.start_and_wait();
        manager.set_thread_count(12).unwrap();
        manager.stop_and_wait(None).unwrap();
        store.save().unwrap();
    }

    // Second run: the persisted count is applied on load.
    {
        let store = Arc::new(SettingsManager::with_file(&path).unwrap());
        let manager = manager();
        manager.load_settings(store);

        let config = manager.config();
        assert_eq!(config.max_threads, 12);
        assert_eq!(config.min_threads, 6);
    }
}

#[test]
fn test_manager_without_store_runs_fine() {
    let manager = manager();
    manager.start_and_wait();

    // No store attached: persistence is a no-op rather than an error.
    manager.set_thread_count(8).unwrap();
    assert_eq!(manager.config().max_threads, 8);

    manager.stop_and_wait(None).unwrap();
}
