//! Bounded worker pool over a shared unbounded work queue.
//!
//! Workers block on the queue with the configured keep-alive timeout;
//! threads above the minimum exit when the timeout expires idle. A new
//! thread is spawned at submit time when no worker is idle and the maximum
//! has not been reached.
//!
//! Worker identity is an explicit thread-local pool id set before a worker
//! enters its loop and cleared on exit. `is_worker_thread` compares it with
//! the pool's own id; this is what makes reentrant synchronous invocation
//! detectable without inspecting ambient thread state.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_POOL: Cell<Option<u64>> = const { Cell::new(None) };
}

#[derive(Default)]
struct Counts {
    live: usize,
    idle: usize,
    spawned: usize,
}

struct PoolShared {
    id: u64,
    min_threads: usize,
    keep_alive: Duration,
    rx: Receiver<Job>,
    counts: Mutex<Counts>,
    terminated: Condvar,
}

/// Handle to a running pool. Cloning shares the queue; dropping the last
/// sender clone closes the queue and lets workers drain and exit.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    tx: Sender<Job>,
    max_threads: usize,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub(crate) fn new(min_threads: usize, max_threads: usize, keep_alive: Duration) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            min_threads,
            keep_alive,
            rx,
            counts: Mutex::new(Counts::default()),
            terminated: Condvar::new(),
        });
        let pool = Self {
            tx,
            max_threads,
            shared,
        };
        for _ in 0..min_threads {
            pool.spawn_worker();
        }
        pool
    }

    /// Queue a job for execution, growing the pool if every worker is busy.
    pub(crate) fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            // Queue closed: the pool is shutting down.
            return;
        }
        let should_spawn = {
            let counts = self.shared.counts.lock();
            counts.idle == 0 && counts.live < self.max_threads
        };
        if should_spawn {
            self.spawn_worker();
        }
    }

    /// Whether the calling thread is one of this pool's workers.
    pub(crate) fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.get() == Some(self.shared.id)
    }

    /// Number of live worker threads.
    pub(crate) fn thread_count(&self) -> usize {
        self.shared.counts.lock().live
    }

    /// Close the queue. Queued jobs still run; workers exit once drained.
    pub(crate) fn shutdown(self) -> PoolHandle {
        PoolHandle {
            shared: self.shared,
        }
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let name = {
            let mut counts = self.shared.counts.lock();
            counts.live += 1;
            counts.spawned += 1;
            format!("task-pool-{}-{}", shared.id, counts.spawned)
        };
        std::thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(shared))
            .expect("failed to spawn task pool worker thread");
    }
}

/// What remains of a pool after shutdown: the ability to wait for its
/// workers to finish.
pub(crate) struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Wait until every worker has exited, or the timeout elapses.
    /// Returns false on timeout.
    pub(crate) fn await_termination(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut counts = self.shared.counts.lock();
        while counts.live > 0 {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline
                        || self
                            .shared
                            .terminated
                            .wait_for(&mut counts, deadline - now)
                            .timed_out()
                    {
                        return counts.live == 0;
                    }
                }
                None => self.shared.terminated.wait(&mut counts),
            }
        }
        true
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.get() == Some(self.shared.id)
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    CURRENT_POOL.set(Some(shared.id));
    tracing::trace!(pool = shared.id, "worker thread started");

    loop {
        {
            shared.counts.lock().idle += 1;
        }
        let received = shared.rx.recv_timeout(shared.keep_alive);
        {
            shared.counts.lock().idle -= 1;
        }
        match received {
            Ok(job) => job(),
            Err(RecvTimeoutError::Timeout) => {
                // Retire only while holding the lock, so concurrent
                // timeouts cannot shrink the pool below the minimum.
                let mut counts = shared.counts.lock();
                if counts.live > shared.min_threads {
                    counts.live -= 1;
                    if counts.live == 0 {
                        shared.terminated.notify_all();
                    }
                    drop(counts);
                    CURRENT_POOL.set(None);
                    tracing::trace!(pool = shared.id, "worker thread retiring");
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    CURRENT_POOL.set(None);
    tracing::trace!(pool = shared.id, "worker thread exiting");
    let mut counts = shared.counts.lock();
    counts.live -= 1;
    if counts.live == 0 {
        shared.terminated.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_minimum_threads_prestarted() {
        let pool = WorkerPool::new(2, 4, Duration::from_secs(1));
        assert_eq!(pool.thread_count(), 2);
        let handle = pool.shutdown();
        assert!(handle.await_termination(Some(Duration::from_secs(5))));
    }

    #[test]
    fn test_jobs_run_and_pool_drains_on_shutdown() {
        let pool = WorkerPool::new(1, 1, Duration::from_millis(100));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.execute(Box::new(move || {
                std::thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let handle = pool.shutdown();
        assert!(handle.await_termination(Some(Duration::from_secs(5))));
        // Queued jobs still ran to completion after shutdown.
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_worker_identity() {
        let pool = WorkerPool::new(1, 1, Duration::from_millis(100));
        let other = WorkerPool::new(1, 1, Duration::from_millis(100));
        assert!(!pool.is_worker_thread());

        let (tx, rx) = std::sync::mpsc::channel();
        let probe = pool.clone();
        let foreign = other.clone();
        pool.execute(Box::new(move || {
            let _ = tx.send((probe.is_worker_thread(), foreign.is_worker_thread()));
        }));
        let (own, alien) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(own);
        assert!(!alien);

        pool.shutdown().await_termination(Some(Duration::from_secs(5)));
        other.shutdown().await_termination(Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_idle_threads_above_minimum_exit() {
        let pool = WorkerPool::new(1, 3, Duration::from_millis(20));

        // Occupy the prestarted worker before queueing more work, so the
        // second job observes no idle worker and forces growth.
        let (started_a, running_a) = std::sync::mpsc::channel();
        let (release_a, hold_a) = std::sync::mpsc::channel::<()>();
        pool.execute(Box::new(move || {
            started_a.send(()).unwrap();
            hold_a.recv().unwrap();
        }));
        running_a.recv_timeout(Duration::from_secs(5)).unwrap();

        let (started_b, running_b) = std::sync::mpsc::channel();
        let (release_b, hold_b) = std::sync::mpsc::channel::<()>();
        pool.execute(Box::new(move || {
            started_b.send(()).unwrap();
            hold_b.recv().unwrap();
        }));
        running_b.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(pool.thread_count() >= 2);

        release_a.send(()).unwrap();
        release_b.send(()).unwrap();

        // After the keep-alive window the surplus thread retires.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(pool.thread_count(), 1);

        pool.shutdown().await_termination(Some(Duration::from_secs(5)));
    }
}
