//! Accounting for units handed to the pool but not yet completed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::error;

#[derive(Debug, Default)]
struct CounterState {
    count: AtomicUsize,
    idle: Notify,
}

/// Count of dispatched-but-unfinished units for one stage.
///
/// The only way to increment is [`PendingCounter::acquire`], and the only way
/// to decrement is dropping the returned [`PendingGuard`]. A unit's guard
/// travels with its task, so completion, failure, panic and abort all
/// release it exactly once.
#[derive(Debug, Clone, Default)]
pub struct PendingCounter {
    state: Arc<CounterState>,
}

impl PendingCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more pending unit.
    #[must_use = "dropping the guard immediately releases the unit"]
    pub fn acquire(&self) -> PendingGuard {
        self.state.count.fetch_add(1, Ordering::AcqRel);
        PendingGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Current number of pending units.
    #[must_use]
    pub fn get(&self) -> usize {
        self.state.count.load(Ordering::Acquire)
    }

    /// Waits until no unit is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns true if any unit is pending.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.get() > 0
    }
}

/// Releases one pending unit when dropped.
#[derive(Debug)]
pub struct PendingGuard {
    state: Arc<CounterState>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let released = self
            .state
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match released {
            Ok(1) => self.state.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => {
                // More completions than dispatches: the accounting is broken and
                // idleness can no longer be trusted anywhere in the pipeline.
                error!("pending counter released below zero; aborting");
                std::process::abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let counter = PendingCounter::new();
        assert!(!counter.is_busy());

        let a = counter.acquire();
        let b = counter.acquire();
        assert_eq!(counter.get(), 2);

        drop(a);
        assert_eq!(counter.get(), 1);
        drop(b);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_release_on_panic() {
        let counter = PendingCounter::new();
        let guard = counter.acquire();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("unit failed");
        }));

        assert!(result.is_err());
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn test_release_on_task_abort() {
        let counter = PendingCounter::new();
        let guard = counter.acquire();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        assert_eq!(counter.get(), 1);

        handle.abort();
        let _ = handle.await;
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let counter = PendingCounter::new();
        counter.wait_idle().await;

        let guard = counter.acquire();
        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_negative_under_contention() {
        let counter = PendingCounter::new();
        let mut handles = Vec::new();

        for _ in 0..200 {
            let guard = counter.acquire();
            let observer = counter.clone();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                // While this guard is alive the count includes it.
                assert!(observer.get() >= 1);
                drop(guard);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.get(), 0);
    }
}
