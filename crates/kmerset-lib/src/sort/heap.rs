//! Min-heap for k-way merging
//!
//! Entries are ordered by `(key, insertion sequence)`, so equal keys pop in
//! the order they were pushed. Values ride along without taking part in the
//! ordering.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// An entry popped from a [`MergeHeap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapItem<K, V> {
    /// Ordering key
    pub key: K,
    /// Payload
    pub value: V,
    /// Index of the source the entry came from
    pub source: usize,
}

struct Entry<K, V> {
    key: K,
    seq: u64,
    value: V,
    source: usize,
}

impl<K: Ord, V> PartialEq for Entry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl<K: Ord, V> Eq for Entry<K, V> {}

impl<K: Ord, V> PartialOrd for Entry<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Ord for Entry<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then(self.seq.cmp(&other.seq))
    }
}

/// Stable min-heap keyed by `K`
pub struct MergeHeap<K: Ord, V> {
    heap: BinaryHeap<Reverse<Entry<K, V>>>,
    seq: u64,
}

impl<K: Ord, V> MergeHeap<K, V> {
    /// Create a heap sized for `sources` open inputs
    pub fn with_capacity(sources: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources),
            seq: 0,
        }
    }

    /// Insert an entry
    pub fn push(&mut self, key: K, value: V, source: usize) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Reverse(Entry { key, seq, value, source }));
    }

    /// Remove the smallest entry
    pub fn pop(&mut self) -> Option<HeapItem<K, V>> {
        self.heap.pop().map(|Reverse(e)| HeapItem {
            key: e.key,
            value: e.value,
            source: e.source,
        })
    }

    /// Key of the smallest entry
    pub fn peek_key(&self) -> Option<&K> {
        self.heap.peek().map(|Reverse(e)| &e.key)
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the heap is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
