//! Deduplicating work queue with per-item exponential backoff.
//!
//! An item is held at most once in the pending set. While a worker processes an item, adding
//! it again marks it dirty and it is re-queued when [`WorkQueue::done`] is called, so one key
//! is never processed by two workers at the same time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

struct Inner<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    waiting: HashMap<T, Instant>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

impl<T: Clone + Eq + Hash> Inner<T> {
    /// Returns whether a waiter should be woken.
    fn insert(&mut self, item: T) -> bool {
        if self.shutting_down || self.dirty.contains(&item) {
            return false;
        }
        self.dirty.insert(item.clone());
        if self.processing.contains(&item) {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    fn promote_ready(&mut self, now: Instant) -> Option<Instant> {
        let ready = self
            .waiting
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(item, _)| item.clone())
            .collect::<Vec<_>>();
        for item in ready {
            self.waiting.remove(&item);
            self.insert(item);
        }
        self.waiting.values().min().copied()
    }
}

pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T: Clone + Eq + Hash + Send> Default for WorkQueue<T> {
    fn default() -> Self {
        WorkQueue::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl<T: Clone + Eq + Hash + Send> WorkQueue<T> {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        WorkQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: HashMap::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    pub async fn add(&self, item: T) {
        let wake = self.inner.lock().await.insert(item);
        if wake {
            self.notify.notify_one();
        }
    }

    /// Adds `item` once `delay` has passed. An earlier pending deadline for the same item wins.
    pub async fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            return self.add(item).await;
        }
        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            return;
        }
        let ready_at = Instant::now() + delay;
        inner
            .waiting
            .entry(item)
            .and_modify(|at| *at = (*at).min(ready_at))
            .or_insert(ready_at);
        drop(inner);
        self.notify.notify_one();
    }

    /// Re-adds `item` after its backoff delay and counts one more failure for it.
    pub async fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut inner = self.inner.lock().await;
            let failures = inner.failures.entry(item.clone()).or_default();
            let delay = self.backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(item, delay).await;
    }

    /// `base * 2^failures`, capped at the maximum delay.
    pub fn backoff(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Clears the failure history of `item`.
    pub async fn forget(&self, item: &T) {
        self.inner.lock().await.failures.remove(item);
    }

    pub async fn num_requeues(&self, item: &T) -> u32 {
        self.inner
            .lock()
            .await
            .failures
            .get(item)
            .copied()
            .unwrap_or_default()
    }

    /// Waits for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return None;
            }
            let next_ready = inner.promote_ready(Instant::now());
            if let Some(item) = inner.queue.pop_front() {
                inner.dirty.remove(&item);
                inner.processing.insert(item.clone());
                let more = !inner.queue.is_empty();
                drop(inner);
                if more {
                    self.notify.notify_one();
                }
                return Some(item);
            }
            // Created under the lock so a concurrent add or shutdown cannot slip past us.
            let notified = self.notify.notified();
            drop(inner);

            match next_ready {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks `item` as processed, re-queueing it if it was added in the meantime.
    pub async fn done(&self, item: &T) {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(item);
        let requeue = inner.dirty.contains(item) && !inner.shutting_down;
        if requeue {
            inner.queue.push_back(item.clone());
        }
        drop(inner);
        if requeue {
            self.notify.notify_one();
        }
    }

    /// Stops handing out items and wakes every waiting worker.
    pub async fn shutdown(&self) {
        self.inner.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.lock().await.shutting_down
    }

    /// Number of items ready to be handed out.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
