//! Work queue of resource keys
//!
//! # Processing model
//!
//! A key is in at most one of two places at a time: waiting in the ready
//! queue, or held by a worker between [`WorkQueue::get`] and
//! [`WorkQueue::done`]. Adding a key that is already waiting is a no-op.
//! Adding a key that is being processed marks it dirty; it goes back on the
//! ready queue once the worker calls `done`. This guarantees that at most one
//! worker reconciles a given key at any time.
//!
//! # Tracked keys
//!
//! Next to the scheduling state the queue keeps the set of keys that are
//! still alive. [`WorkQueue::add`] registers a key there and
//! [`WorkQueue::finalize`] removes it. Shutdown walks this set to give every
//! live resource one more delivery.
//!
//! # Delayed keys
//!
//! At most one timer per key is pending. [`WorkQueue::add_after`] keeps the
//! earliest deadline; a later request for a key that is already waiting is
//! dropped, an earlier one supersedes it.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cs_core::ObjectKey;

use super::{ExponentialFailureRateLimiter, RateLimiter};

/// Thread-safe, deduplicating queue of resource keys
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    /// Wakes blocked `get` calls on new items or shutdown
    notify: Notify,
    /// Cancels pending `add_after` timers on shutdown
    timers: CancellationToken,
    /// Deadline of the pending timer for each delayed key
    waiting: DashMap<ObjectKey, Instant>,
    rate_limiter: Box<dyn RateLimiter>,
    tracked: DashSet<ObjectKey>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
    drain: bool,
}

impl WorkQueue {
    /// Create a queue with the default exponential rate limiter
    pub fn new() -> Self {
        Self::with_rate_limiter(Box::new(ExponentialFailureRateLimiter::default()))
    }

    /// Create a queue with a custom rate limiter
    pub fn with_rate_limiter(rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                timers: CancellationToken::new(),
                waiting: DashMap::new(),
                rate_limiter,
                tracked: DashSet::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `key` as tracked and schedule it for immediate processing
    pub fn add(&self, key: &ObjectKey) {
        if self.is_shutting_down() {
            return;
        }
        self.inner.tracked.insert(key.clone());
        self.enqueue(key);
    }

    /// Schedule `key` for immediate processing without touching the tracked set
    pub fn enqueue(&self, key: &ObjectKey) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(key) {
            return;
        }
        state.ready.push_back(key.clone());
        drop(state);

        self.inner.notify.notify_waiters();
    }

    /// Schedule `key` after `delay`
    ///
    /// If `key` already waits for an earlier or equal deadline this is a
    /// no-op. The timer is dropped if the queue shuts down first. Must be
    /// called from within a tokio runtime unless `delay` is zero.
    pub fn add_after(&self, key: &ObjectKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.enqueue(key);
            return;
        }

        let deadline = Instant::now() + delay;
        match self.inner.waiting.entry(key.clone()) {
            Entry::Occupied(mut pending) => {
                if *pending.get() <= deadline {
                    return;
                }
                pending.insert(deadline);
            }
            Entry::Vacant(slot) => {
                slot.insert(deadline);
            }
        }

        let queue = self.clone();
        let key = key.clone();
        let cancel = self.inner.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    // A superseded timer leaves the entry to its replacement.
                    let current = queue
                        .inner
                        .waiting
                        .remove_if(&key, |_, pending| *pending == deadline)
                        .is_some();
                    if current {
                        queue.enqueue(&key);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Number of keys with a pending `add_after` timer
    pub fn waiting_len(&self) -> usize {
        self.inner.waiting.len()
    }

    /// Schedule `key` after the rate limiter's delay for it
    pub fn add_rate_limited(&self, key: &ObjectKey) {
        let delay = self.inner.rate_limiter.when(key);
        self.add_after(key, delay);
    }

    /// Clear the rate limiter's failure history for `key`
    pub fn forget(&self, key: &ObjectKey) {
        self.inner.rate_limiter.forget(key);
    }

    /// Number of rate-limited retries recorded for `key`
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Wait for the next ready key
    ///
    /// Returns `None` once the queue is shutting down and, when draining,
    /// no ready keys are left. The caller owns the returned key until it
    /// calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Enabled before the state check so a wakeup in between is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down && !state.drain {
                    return None;
                }
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer being processed
    ///
    /// If the key was added again while it was processed, it goes back on
    /// the ready queue now.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        if !state.processing.remove(key) {
            return;
        }
        if state.dirty.contains(key) {
            state.ready.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_waiters();
        }
    }

    /// Remove `key` from the tracked set
    pub fn finalize(&self, key: &ObjectKey) {
        self.inner.tracked.remove(key);
    }

    /// Whether `key` is still tracked
    pub fn is_tracked(&self, key: &ObjectKey) -> bool {
        self.inner.tracked.contains(key)
    }

    /// Snapshot of every tracked key
    pub fn tracked_keys(&self) -> Vec<ObjectKey> {
        self.inner.tracked.iter().map(|k| k.key().clone()).collect()
    }

    /// Number of tracked keys
    pub fn tracked_len(&self) -> usize {
        self.inner.tracked.len()
    }

    /// Number of keys waiting in the ready queue
    pub fn len(&self) -> usize {
        self.state().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop immediately; `get` returns `None` even if keys are waiting
    pub fn shut_down(&self) {
        self.begin_shutdown(false);
    }

    /// Stop accepting keys, but keep delivering the ones already waiting
    pub fn shut_down_with_drain(&self) {
        self.begin_shutdown(true);
    }

    fn begin_shutdown(&self, drain: bool) {
        {
            let mut state = self.state();
            if state.shutting_down {
                // A drain request never turns an immediate stop back on.
                state.drain = state.drain && drain;
            } else {
                state.shutting_down = true;
                state.drain = drain;
            }
        }
        self.inner.timers.cancel();
        self.inner.waiting.clear();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(name)
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        queue.add(&key("b"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Some(key("a")));
        assert_eq!(queue.get().await, Some(key("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_add_while_waiting_is_deduplicated() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        queue.add(&key("a"));

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_add_while_processing_redelivers_once_after_done() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        let got = queue.get().await.unwrap();

        queue.add(&key("a"));
        queue.add(&key("a"));
        assert!(queue.is_empty(), "must not surface while in flight");

        queue.done(&got);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(key("a")));
        queue.done(&key("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_get_is_ignored() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        queue.done(&key("a"));

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_tracked_set() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        queue.enqueue(&key("b"));

        assert!(queue.is_tracked(&key("a")));
        assert!(!queue.is_tracked(&key("b")));
        assert_eq!(queue.tracked_len(), 1);

        queue.finalize(&key("a"));
        assert_eq!(queue.tracked_len(), 0);
        assert!(queue.tracked_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_delivery() {
        let queue = WorkQueue::new();
        queue.add_after(&key("a"), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_keeps_one_timer_per_key() {
        let queue = WorkQueue::new();
        let k = key("a");

        queue.add_after(&k, Duration::from_secs(5));
        queue.add_after(&k, Duration::from_secs(8));
        assert_eq!(queue.waiting_len(), 1);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(queue.get().await, Some(k.clone()));
        queue.done(&k);
        assert_eq!(queue.waiting_len(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_add_after_supersedes_pending_timer() {
        let queue = WorkQueue::new();
        let k = key("a");

        queue.add_after(&k, Duration::from_secs(10));
        queue.add_after(&k, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(queue.get().await, Some(k.clone()));
        queue.done(&k);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.waiting_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_grows_delay() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.0);
        let queue = WorkQueue::with_rate_limiter(Box::new(limiter));
        let k = key("a");

        queue.add_rate_limited(&k);
        queue.add_rate_limited(&k);
        assert_eq!(queue.num_requeues(&k), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(queue.len(), 1);

        queue.forget(&k);
        assert_eq!(queue.num_requeues(&k), 0);
    }

    #[tokio::test]
    async fn test_get_blocks_until_add() {
        let queue = WorkQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move { consumer.get().await });

        tokio::task::yield_now().await;
        queue.add(&key("late"));

        assert_eq!(handle.await.unwrap(), Some(key("late")));
    }

    #[tokio::test]
    async fn test_shut_down_wakes_blocked_get() {
        let queue = WorkQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move { consumer.get().await });

        tokio::task::yield_now().await;
        queue.shut_down();

        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shut_down_with_drain_delivers_waiting_keys() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        queue.add(&key("b"));
        queue.shut_down_with_drain();

        queue.add(&key("c"));
        assert!(!queue.is_tracked(&key("c")));
        assert_eq!(queue.get().await, Some(key("a")));
        assert_eq!(queue.get().await, Some(key("b")));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shut_down_discards_waiting_keys() {
        let queue = WorkQueue::new();
        queue.add(&key("a"));
        queue.shut_down();

        assert!(queue.is_shutting_down());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timers() {
        let queue = WorkQueue::new();
        queue.add_after(&key("a"), Duration::from_secs(1));
        queue.shut_down_with_drain();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.waiting_len(), 0);
    }
}
