//! A binary min-heap with decrease-key and a deterministic tie-break.
//!
//! Dijkstra passes over reweighted graphs need to lower the priority of a
//! queued node when a shorter path is found, and the pop order must be
//! stable across runs so that rule counters and witness cycles are
//! reproducible. Ties are broken by insertion sequence.

use alloc::vec::Vec;
use core::hash::Hash;
use tempo_core::Weight;
use tempo_core::collections::HashMap;

/// Min-priority queue over items of type `K`
#[derive(Clone, Debug)]
pub struct MinQueue<K: Copy + Eq + Hash> {
    heap: Vec<HeapSlot<K>>,
    pos: HashMap<K, usize>,
    seq: u64,
}

#[derive(Clone, Copy, Debug)]
struct HeapSlot<K> {
    prio: Weight,
    seq: u64,
    item: K,
}

impl<K> HeapSlot<K> {
    #[inline]
    fn rank(&self) -> (Weight, u64) {
        (self.prio, self.seq)
    }
}

impl<K: Copy + Eq + Hash> Default for MinQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> MinQueue<K> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            pos: HashMap::default(),
            seq: 0,
        }
    }

    /// Returns `true` when no item is queued
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Current priority of `item`, if queued
    pub fn priority(&self, item: &K) -> Option<Weight> {
        self.pos.get(item).map(|i| self.heap[*i].prio)
    }

    /// Queues `item` at `prio`, or lowers its priority if it is already
    /// queued at a higher one
    ///
    /// Returns `true` when the queue changed. Raising a priority is a
    /// no-op: a settled shorter path is never forgotten.
    pub fn insert_or_decrease(&mut self, item: K, prio: Weight) -> bool {
        match self.pos.get(&item) {
            Some(&i) => {
                if self.heap[i].prio <= prio {
                    return false;
                }
                self.heap[i].prio = prio;
                self.sift_up(i);
                true
            }
            None => {
                let slot = HeapSlot {
                    prio,
                    seq: self.seq,
                    item,
                };
                self.seq += 1;
                self.heap.push(slot);
                let i = self.heap.len() - 1;
                self.pos.insert(item, i);
                self.sift_up(i);
                true
            }
        }
    }

    /// Removes and returns the minimum item with its priority
    pub fn pop_min(&mut self) -> Option<(K, Weight)> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        self.pos.insert(self.heap[0].item, 0);
        let slot = self.heap.pop().unwrap();
        self.pos.remove(&slot.item);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some((slot.item, slot.prio))
    }

    /// Drops every queued item
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pos.clear();
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].rank() <= self.heap[i].rank() {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut smallest = i;
            for child in [2 * i + 1, 2 * i + 2] {
                if child < self.heap.len() && self.heap[child].rank() < self.heap[smallest].rank() {
                    smallest = child;
                }
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos.insert(self.heap[a].item, a);
        self.pos.insert(self.heap[b].item, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_priority_order() {
        let mut q = MinQueue::new();
        q.insert_or_decrease("c", 3);
        q.insert_or_decrease("a", 1);
        q.insert_or_decrease("b", 2);
        assert_eq!(q.pop_min(), Some(("a", 1)));
        assert_eq!(q.pop_min(), Some(("b", 2)));
        assert_eq!(q.pop_min(), Some(("c", 3)));
        assert_eq!(q.pop_min(), None);
    }

    #[test]
    fn decrease_key_moves_item_forward() {
        let mut q = MinQueue::new();
        q.insert_or_decrease("a", 10);
        q.insert_or_decrease("b", 5);
        assert!(q.insert_or_decrease("a", 1));
        assert!(!q.insert_or_decrease("a", 7));
        assert_eq!(q.pop_min(), Some(("a", 1)));
        assert_eq!(q.pop_min(), Some(("b", 5)));
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut q = MinQueue::new();
        q.insert_or_decrease("x", 4);
        q.insert_or_decrease("y", 4);
        q.insert_or_decrease("z", 4);
        assert_eq!(q.pop_min().unwrap().0, "x");
        assert_eq!(q.pop_min().unwrap().0, "y");
        assert_eq!(q.pop_min().unwrap().0, "z");
    }
}
