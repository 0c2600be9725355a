//! Fixed-capacity rolling history with FIFO eviction

use std::collections::VecDeque;

/// Bounded, insertion-ordered buffer. Records are never mutated after append;
/// readers get clones.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append a record, returning the evicted oldest record when full
    pub fn append(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity { self.items.pop_front() } else { None };
        self.items.push_back(item);
        evicted
    }

    /// Up to `n` most recent records, most recent first
    pub fn recent(&self, n: usize) -> Vec<T> {
        self.items.iter().rev().take(n).cloned().collect()
    }

    pub fn latest(&self) -> Option<T> {
        self.items.back().cloned()
    }

    /// All records, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Borrowing iterator, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
