use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Ready-queue entry; ordered by priority, then by name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueEntry {
    pub priority: u32,
    pub name: String,
}

impl QueueEntry {
    pub fn new(priority: u32, name: impl Into<String>) -> Self {
        Self {
            priority,
            name: name.into(),
        }
    }
}

/// A thread-safe min-priority queue with optional capacity control
pub struct ReadyQueue {
    heap: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    available: Condvar,
    capacity: Option<usize>,
}

impl ReadyQueue {
    /// Creates a new ReadyQueue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Pushes an entry onto the queue.
    /// Returns false if the queue is at capacity (backpressure)
    pub fn push(&self, entry: QueueEntry) -> bool {
        let mut heap = self.heap.lock();
        if let Some(capacity) = self.capacity {
            if heap.len() >= capacity {
                return false;
            }
        }
        heap.push(Reverse(entry));
        drop(heap);
        self.available.notify_one();
        true
    }

    /// Pops the most urgent entry without waiting
    pub fn pop(&self) -> Option<QueueEntry> {
        self.heap.lock().pop().map(|Reverse(entry)| entry)
    }

    /// Pops the most urgent entry, waiting at most `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + timeout;
        let mut heap = self.heap.lock();
        loop {
            if let Some(Reverse(entry)) = heap.pop() {
                return Some(entry);
            }
            if self.available.wait_until(&mut heap, deadline).timed_out() {
                return heap.pop().map(|Reverse(entry)| entry);
            }
        }
    }

    /// Returns the current number of entries in the queue
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all entries from the queue
    pub fn clear(&self) {
        self.heap.lock().clear();
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        match self.capacity {
            Some(capacity) => self.len() >= capacity,
            None => false,
        }
    }
}
