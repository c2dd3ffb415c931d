use std::collections::vec_deque;
use std::collections::VecDeque;

use serde::Serialize;
use serde::Serializer;

/// Fixed capacity FIFO buffer; pushing into a full ring evicts the oldest item
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryRing<T> {
    /// # Panics
    /// Panics if `capacity` is zero
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "history ring capacity must be positive");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted entry if the ring was full
    pub fn push(
        &mut self,
        item: T,
    ) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

impl<T: Serialize> Serialize for HistoryRing<T> {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}
