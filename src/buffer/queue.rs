//! Bounded sample queue
//!
//! Producers never block: when the queue is full the oldest entry is evicted
//! and counted. Consumers wait asynchronously with a deadline.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Outcome of a waiting pop
#[derive(Debug, PartialEq)]
pub enum Popped<T> {
    Item(T),
    /// Deadline passed with the queue still empty
    Timeout,
    /// Queue was closed and is drained
    Closed,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    dropped: u64,
    closed: bool,
}

/// Bounded FIFO with oldest-first eviction
#[derive(Debug)]
pub struct SampleQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> SampleQueue<T> {
    /// Create a queue holding at most `capacity` items (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(4096)),
                dropped: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item, evicting the oldest one if full
    ///
    /// Returns `true` if an item was evicted. Items pushed after
    /// [`close`](Self::close) are discarded.
    pub fn push(&self, item: T) -> bool {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front();
                state.dropped += 1;
                true
            } else {
                false
            };
            state.items.push_back(item);
            evicted
        };
        self.notify.notify_waiters();
        evicted
    }

    /// Remove the oldest item without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Remove up to `max` items without waiting
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let mut state = self.state.lock();
        let n = max.min(state.items.len());
        state.items.drain(..n).collect()
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive
    pub async fn pop(&self, timeout: Duration) -> Popped<T> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + crate::protocol::constants::FOREVER);
        self.pop_until(deadline).await
    }

    /// Remove the oldest item, waiting until `deadline`
    pub async fn pop_until(&self, deadline: Instant) -> Popped<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Popped::Item(item);
                }
                if state.closed {
                    return Popped::Closed;
                }
            }
            if Instant::now() >= deadline {
                return Popped::Timeout;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Discard all queued items, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.items.len();
        state.items.clear();
        n
    }

    /// Total items evicted by overflow
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Stop accepting items and wake all waiters
    ///
    /// Items already queued can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Accept items again after [`close`](Self::close)
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
