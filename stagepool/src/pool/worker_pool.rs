//! Bounded pool of worker tasks.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs submitted futures with at most `size` of them executing at once.
///
/// Submission never blocks: each future gets its own task that waits for a
/// permit, so submission order is preserved while execution overlaps.
/// [`WorkerPool::stop`] aborts everything still tracked instead of draining it.
pub struct WorkerPool {
    name: String,
    size: usize,
    /// Execution permits, one per worker slot.
    permits: Arc<Semaphore>,
    /// Handles to spawned tasks.
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool with `size` worker slots (at least one).
    #[must_use]
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of worker slots.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Submits a future for execution.
    ///
    /// After [`stop`](Self::stop) or [`abort_all`](Self::abort_all) the future
    /// is dropped without running.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The stop flag is only flipped under this lock, so no handle can be
        // pushed after an abort has taken the list.
        let mut handles = self.handles.lock();
        if self.is_stopped() {
            debug!(pool = %self.name, "Submission after stop dropped");
            return;
        }

        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });

        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks currently holding a worker slot.
    #[must_use]
    pub fn active(&self) -> usize {
        if self.is_stopped() {
            return 0;
        }
        self.size - self.permits.available_permits()
    }

    /// Number of spawned tasks that have not finished, running or waiting.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Returns true once [`stop`](Self::stop) or [`abort_all`](Self::abort_all) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stops the pool, aborting queued and running tasks.
    ///
    /// Waits for the aborted tasks to unwind so none of them can produce
    /// anything after this returns. Returns the number of tasks aborted.
    pub async fn stop(&self) -> usize {
        let handles = self.take_tracked();
        for handle in &handles {
            handle.abort();
        }
        self.permits.close();

        let mut aborted = 0;
        for handle in handles {
            match handle.await {
                Ok(()) => {}
                Err(join_error) if join_error.is_cancelled() => aborted += 1,
                Err(join_error) => {
                    warn!(pool = %self.name, error = %join_error, "Worker task panicked");
                }
            }
        }

        debug!(pool = %self.name, aborted, "Worker pool stopped");
        aborted
    }

    /// Stops the pool without waiting: every tracked task is told to abort
    /// and will be dropped at its next yield point.
    ///
    /// Usable from synchronous code such as `Drop`. Returns the number of
    /// tasks that were still unfinished.
    pub fn abort_all(&self) -> usize {
        let handles = self.take_tracked();
        let unfinished = handles.iter().filter(|h| !h.is_finished()).count();
        for handle in &handles {
            handle.abort();
        }
        self.permits.close();
        debug!(pool = %self.name, unfinished, "Worker pool aborted");
        unfinished
    }

    /// Marks the pool stopped and hands over every tracked handle.
    fn take_tracked(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self.handles.lock();
        self.stopped.store(true, Ordering::SeqCst);
        std::mem::take(&mut *handles)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("tracked", &self.tracked())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
