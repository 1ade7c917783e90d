//! Fixed-capacity blocking FIFO.
//!
//! Used for the inbound queue, socket queues and connection receive queues.
//! Storage is reserved up front; pushes never block and fail when full,
//! pops may wait with a bound. The lock is held only for the queue
//! operation itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
    max_len: AtomicUsize,
    /// Set under the items lock; refuses every later push.
    shut: AtomicBool,
}

impl<T> BoundedQueue<T> {
    pub fn new(max_len: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(max_len)),
            ready: Condvar::new(),
            max_len: AtomicUsize::new(max_len),
            shut: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_len.load(Ordering::Relaxed)
    }

    /// Change the bound. Items already queued above a smaller bound stay.
    pub fn set_capacity(&self, max_len: usize) {
        let mut items = self.items.lock();
        if max_len > items.capacity() {
            let extra = max_len - items.len();
            items.reserve(extra);
        }
        self.max_len.store(max_len, Ordering::Relaxed);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Free places left.
    pub fn room(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Append without blocking; hands the item back when full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity() || self.shut.load(Ordering::Relaxed) {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Pop, waiting up to `timeout` for an item. `None` waits forever.
    /// An expired wait is not an error; it yields `None`.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut items, deadline).timed_out() {
                        return items.pop_front();
                    }
                }
                None => self.ready.wait(&mut items),
            }
        }
    }

    /// Refuse all further pushes and hand back what is queued.
    pub fn shut(&self) -> Vec<T> {
        let mut items = self.items.lock();
        self.shut.store(true, Ordering::Relaxed);
        items.drain(..).collect()
    }

    pub fn is_shut(&self) -> bool {
        self.shut.load(Ordering::Relaxed)
    }

    /// Remove and drop everything queued, returning how many items went.
    pub fn clear(&self) -> usize {
        let drained: Vec<T> = self.items.lock().drain(..).collect();
        drained.len()
    }
}
