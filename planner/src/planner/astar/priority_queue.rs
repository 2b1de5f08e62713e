//! Min priority queue keyed by an `f64` priority.

use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// An entity in the queue.
#[derive(Debug, Clone)]
pub struct Item<T> {
    pub value: T,
    pub priority: f64,
}

struct Entry<T> {
    key: (Reverse<OrderedFloat<f64>>, Reverse<u64>),
    item: Item<T>,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Binary min-heap; `pop` always yields the lowest priority. Equal priorities
/// pop in insertion order.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn push(&mut self, value: T, priority: f64) {
        self.seq += 1;
        self.heap.push(Entry {
            key: (Reverse(OrderedFloat(priority)), Reverse(self.seq)),
            item: Item { value, priority },
        });
    }

    pub fn pop(&mut self) -> Option<Item<T>> {
        self.heap.pop().map(|entry| entry.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
