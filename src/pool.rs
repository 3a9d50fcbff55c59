//! Fixed-size worker pool with deferred result handles.
//!
//! Workers pull from a single shared FIFO queue, so tasks dequeue in
//! submission order; completion order is whatever the workers make of it.
//! Submitting returns a [`TaskHandle`] the caller can wait on. Shutdown lets
//! every in-flight task finish, discards queued-but-unstarted tasks (their
//! handles resolve as [`PoolError::Disconnected`]), and joins all workers.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("thread pool requires at least one worker")]
    ZeroWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("cannot submit task to stopped thread pool")]
    Stopped,
    #[error("task did not complete (discarded at shutdown or panicked)")]
    Disconnected,
    #[error("timed out waiting for task result")]
    Timeout,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Deferred result of a submitted task. Waiting blocks the waiter, never the
/// worker.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task resolves.
    pub fn wait(self) -> Result<T, PoolError> {
        self.rx.recv().map_err(|_| PoolError::Disconnected)
    }

    /// Block for at most `timeout`. Timeout enforcement is a caller-side
    /// concern; the task itself keeps running to completion.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, PoolError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => PoolError::Timeout,
            RecvTimeoutError::Disconnected => PoolError::Disconnected,
        })
    }
}

struct PoolQueue {
    jobs: VecDeque<Job>,
    stopped: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
}

impl PoolShared {
    fn lock_queue(&self) -> MutexGuard<'_, PoolQueue> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed worker count, shared FIFO queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(worker_count: usize) -> Result<Self, PoolError> {
        if worker_count == 0 {
            return Err(PoolError::ZeroWorkers);
        }

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("audiomatch-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .map_err(PoolError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { shared, workers })
    }

    /// Queue a task for execution. Fails with [`PoolError::Stopped`] once
    /// shutdown has begun; a task is never silently dropped at submission.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            // The receiver may already be gone; that is the caller's choice.
            let _ = tx.send(task());
        });

        {
            let mut queue = self.shared.lock_queue();
            if queue.stopped {
                return Err(PoolError::Stopped);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();

        Ok(TaskHandle { rx })
    }

    /// Tasks queued but not yet picked up by a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.lock_queue().jobs.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Begin shutdown: reject new submissions, discard queued tasks, wake and
    /// join all workers once their current tasks finish. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.lock_queue();
            queue.stopped = true;
            // Dropping the jobs drops their result senders, so outstanding
            // handles resolve as Disconnected rather than hanging.
            queue.jobs.clear();
        }
        self.shared.available.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.lock_queue();
            loop {
                if queue.stopped {
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        // A panicking task only loses its own result handle; the worker and
        // its siblings keep serving the queue.
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("worker task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(ThreadPool::new(0), Err(PoolError::ZeroWorkers)));
    }

    #[test]
    fn submitted_tasks_produce_results() {
        let pool = ThreadPool::new(4).unwrap();
        let handle = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(handle.wait().unwrap(), 4);
    }

    #[test]
    fn task_handles_are_debuggable() {
        let pool = ThreadPool::new(1).unwrap();
        let handle = pool.submit(|| 1).unwrap();
        assert!(format!("{handle:?}").contains("TaskHandle"));
        assert_eq!(handle.wait().unwrap(), 1);
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = ThreadPool::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                pool.submit(move || log.lock().unwrap().push(i)).unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }

        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn results_map_to_their_own_submissions() {
        let pool = ThreadPool::new(4).unwrap();
        let handles: Vec<_> = (0..32)
            .map(|i| pool.submit(move || i * 10).unwrap())
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait().unwrap(), i * 10);
        }
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut pool = ThreadPool::new(2).unwrap();
        pool.shutdown();
        assert!(matches!(pool.submit(|| ()), Err(PoolError::Stopped)));
    }

    #[test]
    fn shutdown_discards_queued_tasks() {
        let mut pool = ThreadPool::new(1).unwrap();
        let started = Arc::new(AtomicUsize::new(0));

        // Occupy the single worker, then queue more work behind it.
        let blocker = {
            let started = Arc::clone(&started);
            pool.submit(move || {
                started.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
            })
            .unwrap()
        };
        while started.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }

        let queued = pool.submit(|| 42).unwrap();
        pool.shutdown();

        // In-flight task finished; queued one was discarded.
        assert!(blocker.wait().is_ok());
        assert!(matches!(queued.wait(), Err(PoolError::Disconnected)));
    }

    #[test]
    fn wait_timeout_reports_slow_tasks() {
        let pool = ThreadPool::new(1).unwrap();
        let handle = pool
            .submit(|| std::thread::sleep(Duration::from_millis(200)))
            .unwrap();

        let start = Instant::now();
        assert!(matches!(
            handle.wait_timeout(Duration::from_millis(10)),
            Err(PoolError::Timeout)
        ));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn panicking_task_does_not_kill_the_pool() {
        let pool = ThreadPool::new(1).unwrap();
        let bad = pool.submit(|| panic!("boom")).unwrap();
        assert!(matches!(bad.wait(), Err(PoolError::Disconnected)));

        let good = pool.submit(|| 7).unwrap();
        assert_eq!(good.wait().unwrap(), 7);
    }

    #[test]
    fn pending_tasks_counts_queued_work() {
        let pool = ThreadPool::new(1).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicUsize::new(0));

        let blocker = {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            pool.submit(move || {
                started.fetch_add(1, Ordering::SeqCst);
                while release.load(Ordering::SeqCst) == 0 {
                    std::thread::yield_now();
                }
            })
            .unwrap()
        };
        while started.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }

        let queued: Vec<_> = (0..3).map(|i| pool.submit(move || i).unwrap()).collect();
        assert_eq!(pool.pending_tasks(), 3);

        release.store(1, Ordering::SeqCst);
        blocker.wait().unwrap();
        for handle in queued {
            handle.wait().unwrap();
        }
        assert_eq!(pool.pending_tasks(), 0);
    }
}
