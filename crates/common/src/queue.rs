//! Bounded queues for cross-task hand-off.
//!
//! Every hand-off between pipeline tasks goes through a [`BoundedQueue`].
//! A queue never holds more than its capacity: what happens on overflow is
//! decided by its [`OverflowPolicy`], never by growing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// What a full queue does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room (video frames).
    #[default]
    DropOldest,
    /// Refuse the incoming item (audio, encoder submissions).
    RejectNew,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// The item was queued after evicting the oldest one.
    DroppedOldest,
    /// The queue was full and the item was discarded.
    Rejected,
    /// The queue is closed.
    Closed,
}

impl PushOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Enqueued | Self::DroppedOldest)
    }
}

/// Counters for a queue's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub rejected: u64,
}

/// A bounded multi-producer, multi-consumer queue with async pop.
///
/// Cloning yields another handle to the same queue.
pub struct BoundedQueue<T> {
    name: Arc<str>,
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    not_empty: Notify,
    closed: AtomicBool,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: Arc::from(format!("queue-{capacity}")),
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
                policy,
                not_empty: Notify::new(),
                closed: AtomicBool::new(false),
                pushed: AtomicU64::new(0),
                popped: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Set a custom name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push an item, applying the overflow policy when full.
    pub fn push(&self, item: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut items = self.items();
            if items.len() >= self.inner.capacity {
                match self.inner.policy {
                    OverflowPolicy::RejectNew => {
                        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                        return PushOutcome::Rejected;
                    }
                    OverflowPolicy::DropOldest => {
                        items.pop_front();
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        items.push_back(item);
                        PushOutcome::DroppedOldest
                    }
                }
            } else {
                items.push_back(item);
                PushOutcome::Enqueued
            }
        };

        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        self.inner.not_empty.notify_one();
        outcome
    }

    /// Pop the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items().pop_front();
        if item.is_some() {
            self.inner.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Pop the oldest item, waiting until one arrives.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.inner.not_empty.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.items().drain(..).collect();
        self.inner
            .popped
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// Stop accepting items and wake every waiting consumer.
    ///
    /// Items already queued can still be popped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.not_empty.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.inner.capacity
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.inner.policy
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.inner.capacity,
            pushed: self.inner.pushed.load(Ordering::Relaxed),
            popped: self.inner.popped.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }
}
