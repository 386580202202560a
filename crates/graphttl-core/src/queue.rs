//! Queues connecting the API, the monitor and the executor
//!
//! - [`InputQueue`]: lock-guarded FIFO fed by API producers and swapped
//!   wholesale into the monitor's private queue
//! - [`DueHeap`]: min-heap by deadline feeding the executor's batches

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::{Event, Timestamp};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Public input queue
#[derive(Debug, Default)]
pub struct InputQueue {
    events: Mutex<VecDeque<Event>>,
}

impl InputQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn push(&self, event: Event) {
        lock(&self.events).push_back(event);
    }

    /// Append several events
    pub fn extend(&self, events: impl IntoIterator<Item = Event>) {
        lock(&self.events).extend(events);
    }

    /// Queued event count
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Move every queued event into `dst`.
    ///
    /// When `dst` is empty this is an O(1) exchange of the two buffers.
    pub fn transfer_into(&self, dst: &mut VecDeque<Event>) -> usize {
        let mut events = lock(&self.events);
        let n = events.len();
        if dst.is_empty() {
            std::mem::swap(&mut *events, dst);
        } else {
            dst.append(&mut events);
        }
        n
    }

    /// Remove and return every queued event
    pub fn drain(&self) -> VecDeque<Event> {
        std::mem::take(&mut *lock(&self.events))
    }
}

/// Min-heap of events ordered by deadline
#[derive(Debug, Default)]
pub struct DueHeap {
    heap: BinaryHeap<Reverse<Event>>,
}

impl DueHeap {
    /// Create an empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event
    pub fn push(&mut self, event: Event) {
        self.heap.push(Reverse(event));
    }

    /// Pop the earliest event if it is due at `now`
    pub fn pop_due(&mut self, now: Timestamp) -> Option<Event> {
        match self.heap.peek() {
            Some(Reverse(event)) if event.is_due(now) => self.heap.pop().map(|Reverse(e)| e),
            _ => None,
        }
    }

    /// Earliest deadline in the heap
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(event)| event.exec_ts)
    }

    /// Number of events
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if the heap is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every event in deadline order
    pub fn drain_sorted(&mut self) -> Vec<Event> {
        let mut events: Vec<Event> = self.heap.drain().map(|Reverse(e)| e).collect();
        events.sort();
        events
    }
}

impl Extend<Event> for DueHeap {
    fn extend<I: IntoIterator<Item = Event>>(&mut self, iter: I) {
        self.heap.extend(iter.into_iter().map(Reverse));
    }
}
