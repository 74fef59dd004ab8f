//! Pending-request queue ordered by `(priority, distance, submission order)`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use crate::request::{QueueKey, RequestHandle};

/// Stale heap entries tolerated before the heap is rebuilt.
const COMPACT_SLACK: usize = 64;

#[derive(Clone, Copy, Debug)]
struct QueueEntry {
    key: QueueKey,
    handle: RequestHandle,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Min-heap of queued request handles.
///
/// Removal is lazy: [`remove`](Self::remove) only forgets the handle, and the
/// heap entry is skipped when it reaches the top. Push and pop are O(log n).
#[derive(Debug, Default)]
pub struct LoadQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    /// Handles currently queued (dedup and lazy-removal guard).
    queued: FxHashSet<RequestHandle>,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `handle` under `key`. Duplicate handles are ignored.
    pub fn push(&mut self, handle: RequestHandle, key: QueueKey) {
        if self.queued.insert(handle) {
            self.heap.push(Reverse(QueueEntry { key, handle }));
        }
    }

    /// Removes and returns the smallest queued handle.
    pub fn pop(&mut self) -> Option<RequestHandle> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            if self.queued.remove(&entry.handle) {
                return Some(entry.handle);
            }
            // Removed while queued; skip.
        }
        None
    }

    /// Removes `handle` from the queue. Returns `false` if it was not queued.
    pub fn remove(&mut self, handle: RequestHandle) -> bool {
        let removed = self.queued.remove(&handle);
        if removed && self.heap.len() > self.queued.len() * 2 + COMPACT_SLACK {
            self.compact();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }

    /// Queued handles in dispatch order.
    pub fn ordered(&self) -> Vec<RequestHandle> {
        let mut entries: Vec<QueueEntry> = self
            .heap
            .iter()
            .map(|Reverse(entry)| *entry)
            .filter(|entry| self.queued.contains(&entry.handle))
            .collect();
        entries.sort();
        entries.into_iter().map(|entry| entry.handle).collect()
    }

    fn compact(&mut self) {
        let queued = &self.queued;
        self.heap.retain(|Reverse(entry)| queued.contains(&entry.handle));
    }
}
