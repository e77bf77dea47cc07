//! Unbounded FIFO queue with task accounting.
//!
//! Every item put on a [`WorkQueue`] counts as unfinished until a consumer
//! calls [`WorkQueue::task_done`] for it. [`WorkQueue::join`] waits for that
//! count to reach zero, which is how a stage's shutdown waits for its input
//! to be fully handled.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::StageError;

struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
}

/// A multi-producer, multi-consumer queue safe to share across tasks and threads.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    item_ready: Notify,
    all_done: Notify,
}

impl<T> WorkQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            item_ready: Notify::new(),
            all_done: Notify::new(),
        }
    }

    /// Appends an item and wakes one waiting consumer.
    pub fn put(&self, item: T) {
        {
            let mut state = self.state.lock();
            state.items.push_back(item);
            state.unfinished += 1;
        }
        self.item_ready.notify_one();
    }

    /// Removes the oldest item, waiting while the queue is empty.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn get(&self) -> T {
        loop {
            let notified = self.item_ready.notified();
            if let Some(item) = self.try_get() {
                return item;
            }
            notified.await;
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, StageError> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| StageError::Timeout(timeout))
    }

    /// Removes the oldest item if there is one.
    pub fn try_get(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Marks one previously taken item as handled.
    pub fn task_done(&self) -> Result<(), StageError> {
        let mut state = self.state.lock();
        if state.unfinished == 0 {
            return Err(StageError::TaskDoneOverflow);
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            drop(state);
            self.all_done.notify_waiters();
        }
        Ok(())
    }

    /// Discards every waiting item, marking each one handled.
    ///
    /// Returns how many items were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.items.len();
        state.items.clear();
        state.unfinished -= discarded;
        let idle = state.unfinished == 0;
        drop(state);

        if idle {
            self.all_done.notify_waiters();
        }
        discarded
    }

    /// Waits until every item put so far has been marked handled.
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of items waiting to be taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if no item is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Number of items put but not yet marked handled, taken or not.
    #[must_use]
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkQueue")
            .field("len", &state.items.len())
            .field("unfinished", &state.unfinished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready};

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.put(1);
        queue.put(2);
        queue.put(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_get(), Some(1));
        assert_eq!(queue.try_get(), Some(2));
        assert_eq!(queue.try_get(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_get_waits_until_put() {
        let queue = WorkQueue::new();
        let mut fut = tokio_test::task::spawn(queue.get());
        assert_pending!(fut.poll());

        queue.put("late");
        assert!(fut.is_woken());
        assert_eq!(assert_ready!(fut.poll()), "late");
    }

    #[tokio::test]
    async fn test_get_timeout_on_empty() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        let err = queue
            .get_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_task_done_overflow() {
        let queue = WorkQueue::new();
        queue.put(());
        assert!(queue.task_done().is_ok());
        assert!(matches!(queue.task_done(), Err(StageError::TaskDoneOverflow)));
    }

    #[test]
    fn test_unfinished_tracks_taken_items() {
        let queue = WorkQueue::new();
        queue.put('a');
        let _ = queue.try_get();

        assert_eq!(queue.len(), 0);
        assert_eq!(queue.unfinished(), 1);

        queue.task_done().unwrap();
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn test_clear_marks_items_handled() {
        let queue = WorkQueue::new();
        for i in 0..5 {
            queue.put(i);
        }
        let _ = queue.try_get();

        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
        // The taken item is still outstanding.
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn test_join_returns_immediately_when_idle() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        let mut fut = tokio_test::task::spawn(queue.join());
        assert_ready!(fut.poll());
    }

    #[test]
    fn test_join_waits_for_task_done() {
        let queue = WorkQueue::new();
        queue.put(7);

        let mut join = tokio_test::task::spawn(queue.join());
        assert_pending!(join.poll());

        assert_eq!(queue.try_get(), Some(7));
        assert_pending!(join.poll());

        queue.task_done().unwrap();
        assert!(join.is_woken());
        assert_ready!(join.poll());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumer() {
        let queue = Arc::new(WorkQueue::new());
        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..250 {
                    queue.put(p * 1000 + i);
                }
            }));
        }

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..1000 {
                    seen.push(queue.get().await);
                    queue.task_done().unwrap();
                }
                seen
            })
        };

        for producer in producers {
            producer.await.unwrap();
        }
        queue.join().await;

        let mut seen = consumer.await.unwrap();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }
}
