use dispatchkit_core::{
    DiagnosticEvent, Event, EventBus, EventCategory, EventFilter, EventKind, Task, TaskEvent,
    TaskEventKind, TaskManager, TaskManagerConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn manager(min: usize, max: usize) -> TaskManager {
    init_tracing();
    let manager = TaskManager::with_config(TaskManagerConfig {
        min_threads: min,
        max_threads: max,
        keep_alive: Duration::from_millis(100),
    });
    manager.start_and_wait();
    manager
}

/// A manager listener that mirrors task completions onto an event bus, the
/// way an application surfaces background work in its UI event stream.
#[test]
fn test_task_completions_mirrored_onto_bus() {
    let bus = Arc::new(EventBus::new());
    bus.start();

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    bus.add_listener_to(
        "tasks",
        EventFilter::category(EventCategory::Diagnostic),
        Arc::new(move |event: &Event| {
            received_clone.lock().push(event.to_string());
        }),
    );

    let manager = manager(1, 2);
    let bus_clone = Arc::clone(&bus);
    manager.add_listener(Arc::new(move |event: &TaskEvent| {
        if event.kind() == TaskEventKind::Completed {
            bus_clone.submit_to(
                "tasks",
                Event::new(
                    EventKind::Diagnostic(DiagnosticEvent::Notice {
                        message: format!("{} finished", event.task().name()),
                    }),
                    "task-manager",
                ),
            );
        }
    }));

    let task = Task::new("indexing", |_ctx| Ok(()));
    manager.submit(&task).unwrap();
    task.join().unwrap();
    // Completion bookkeeping (and the mirroring listener) runs after join
    // returns; the live set drains once it has fired.
    while !manager.tasks().is_empty() {
        std::thread::sleep(Duration::from_millis(1));
    }

    bus.flush_queue("tasks").unwrap();
    assert_eq!(
        received.lock().clone(),
        vec!["Notice: indexing finished".to_string()]
    );

    manager.stop_and_wait(None).unwrap();
    bus.stop();
}

/// The scenario from the delivery fairness guarantee: a backlog on one
/// queue must not delay a high-priority event on another.
#[test]
fn test_cross_queue_delivery_interleaves() {
    let bus = Arc::new(EventBus::new());
    let deliveries = Arc::new(Mutex::new(Vec::new()));

    for queue in ["bulk", "urgent"] {
        let deliveries = deliveries.clone();
        bus.add_listener_to(
            queue,
            EventFilter::All,
            Arc::new(move |event: &Event| {
                deliveries.lock().push(event.source().to_string());
            }),
        );
    }

    for index in 0..5 {
        bus.submit_to(
            "bulk",
            Event::new(
                EventKind::custom(format!("bulk-{index}"), serde_json::Value::Null),
                "bulk",
            )
            .with_priority(2),
        );
    }
    let urgent = Event::new(
        EventKind::custom("urgent", serde_json::Value::Null),
        "urgent",
    )
    .with_priority(9);
    bus.submit_to("urgent", urgent.clone());

    bus.start();
    urgent.wait().unwrap();
    bus.flush_queue("bulk").unwrap();

    let order = deliveries.lock().clone();
    let position = order.iter().position(|source| source == "urgent").unwrap();
    assert!(position <= 1, "urgent delivered at {position} in {order:?}");
    bus.stop();
}

/// A worker-thread task fans helper work back into the same saturated
/// pool; the reentrant invoke path keeps it deadlock-free.
#[test]
fn test_saturated_pool_with_reentrant_helpers() {
    let manager = manager(1, 1);
    let completed = Arc::new(AtomicUsize::new(0));

    let completed_clone = completed.clone();
    let outer = Task::new("outer", move |ctx| {
        let manager = ctx.manager().cloned().expect("manager attached");
        for index in 0..3 {
            let completed = completed_clone.clone();
            let helper = Task::new(format!("helper-{index}"), move |_ctx| {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            manager.invoke(&helper)?;
        }
        Ok(())
    });

    manager.submit(&outer).unwrap();
    outer.join_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 3);

    manager.stop_and_wait(None).unwrap();
}
