use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default depth of the render queue.
pub const DEFAULT_CAPACITY: usize = 2;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded queue that keeps only the newest items.
///
/// `push` never blocks: when full, the oldest item is evicted. Consumers wait
/// with a timeout so they can notice `close`.
pub struct LatestQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> LatestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panic while holding the lock can not leave the deque inconsistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue `item`, returning `true` if an older item was evicted.
    /// Items pushed after `close` are discarded.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        let evicted = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            true
        } else {
            false
        };
        inner.items.push_back(item);
        drop(inner);
        self.ready.notify_one();
        evicted
    }

    /// Oldest queued item, waiting up to `timeout`. `None` on timeout or once
    /// the queue is closed and empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = match self.ready.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
