//! The internal chunk queue.
//!
//! An ordered sequence of `(value, size)` pairs with a running total.
//! Invariant: `total_size()` equals the sum of the stored sizes at all
//! times and is never negative. Entries leave strictly FIFO; the only
//! bulk removal is [`ChunkQueue::clear`], used by cancel and error paths.

use std::collections::VecDeque;

#[derive(Debug)]
struct Entry<T> {
    value: T,
    size: f64,
}

/// FIFO queue with per-entry sizes and a running total.
#[derive(Debug)]
pub(crate) struct ChunkQueue<T> {
    entries: VecDeque<Entry<T>>,
    total_size: f64,
}

impl<T> ChunkQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            total_size: 0.0,
        }
    }

    /// Appends an entry. The size must already be validated as finite
    /// and non-negative; the queue does not re-check.
    pub(crate) fn push(&mut self, value: T, size: f64) {
        debug_assert!(size.is_finite() && size >= 0.0);
        self.entries.push_back(Entry { value, size });
        self.total_size += size;
    }

    /// Removes and returns the oldest entry.
    pub(crate) fn pop(&mut self) -> Option<T> {
        let entry = self.entries.pop_front()?;
        self.total_size -= entry.size;
        // Floating-point subtraction drifts in either direction; an
        // empty queue must report exactly zero, and a non-empty one must
        // never go negative.
        if self.entries.is_empty() || self.total_size < 0.0 {
            self.total_size = 0.0;
        }
        Some(entry.value)
    }

    pub(crate) fn total_size(&self) -> f64 {
        self.total_size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Discards every buffered entry and resets the total.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.total_size = 0.0;
    }
}
