//! Deduplicating work queue feeding the controller workers.
//!
//! A key is never handed to two workers at once. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so it is queued again once [`WorkQueue::done`] is called.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use converge_core::RequeueBackoff;
use tokio::sync::{Mutex, Notify};

/// Queue state protected by a single lock.
#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }
}

#[derive(Debug)]
struct Shared<K> {
    state: Mutex<QueueState<K>>,
    ready: Notify,
    backoff: RequeueBackoff,
}

/// Cloneable handle to a shared queue.
#[derive(Debug)]
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(backoff: RequeueBackoff) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                ready: Notify::new(),
                backoff,
            }),
        }
    }

    /// Queue `key` unless it is already waiting.
    pub async fn add(&self, key: K) {
        let mut state = self.shared.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.ready.notify_one();
    }

    /// Queue `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Queue `key` after its per-key failure backoff, and count the failure.
    pub async fn add_rate_limited(&self, key: K) -> Duration {
        let delay = self.when(&key).await;
        self.add_after(key, delay);
        delay
    }

    /// Next backoff for `key`: `base * 2^failures`, capped at `max`.
    async fn when(&self, key: &K) -> Duration {
        let mut state = self.shared.state.lock().await;
        let failures = state.failures.entry(key.clone()).or_insert(0);
        let exponent = *failures;
        *failures = failures.saturating_add(1);
        drop(state);

        let backoff = &self.shared.backoff;
        2u32.checked_pow(exponent)
            .and_then(|factor| backoff.base.checked_mul(factor))
            .map_or(backoff.max, |delay| delay.min(backoff.max))
    }

    /// Clear the failure history for `key`.
    pub async fn forget(&self, key: &K) {
        self.shared.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub async fn retries(&self, key: &K) -> u32 {
        self.shared
            .state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
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

    /// Mark `key` as processed, requeueing it if it was added meanwhile.
    pub async fn done(&self, key: &K) {
        let mut state = self.shared.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.ready.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        let mut state = self.shared.state.lock().await;
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);
        self.shared.ready.notify_waiters();
    }

    /// Keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn queue() -> WorkQueue<&'static str> {
        WorkQueue::new(RequeueBackoff {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_duplicate_adds_collapse() {
        let queue = queue();
        queue.add("a").await;
        queue.add("a").await;
        queue.add("b").await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    /// Given: a key being processed
    /// When: it is added again
    /// Then: it is only handed out again after done
    #[tokio::test]
    async fn test_key_in_flight_is_requeued_on_done() {
        let queue = queue();
        queue.add("a").await;
        let key = queue.get().await.unwrap();

        queue.add("a").await;
        assert!(queue.is_empty().await);

        queue.done(&key).await;
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let queue = queue();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shutdown().await;

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_after_delays_the_key() {
        let queue = queue();
        queue.add_after("a", Duration::from_millis(20));
        assert!(queue.is_empty().await);

        let key = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert_eq!(key, Some("a"));
    }

    #[tokio::test]
    async fn test_rate_limit_grows_and_caps() {
        let queue = queue();

        let delays = [
            queue.when(&"a").await,
            queue.when(&"a").await,
            queue.when(&"a").await,
            queue.when(&"a").await,
        ];
        assert_eq!(
            delays,
            [10, 20, 40, 50].map(Duration::from_millis),
        );
        assert_eq!(queue.retries(&"a").await, 4);

        queue.forget(&"a").await;
        assert_eq!(queue.retries(&"a").await, 0);
        assert_eq!(queue.when(&"a").await, Duration::from_millis(10));
    }
}
