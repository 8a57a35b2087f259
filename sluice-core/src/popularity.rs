//! Most-frequently-requested queue.
//!
//! Counts hits per stream key from any number of producers and hands the
//! hottest key to a single consumer on demand. Entries keep accumulating
//! hits while they sit in the queue; popping an entry takes it out of
//! contention without forgetting it, so it can be put back with its count
//! intact or dropped for good.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Snapshot of a queue entry as seen by `peek` and `pop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<V> {
    key: String,
    /// Payload supplied with the first hit for this key. Later hits never
    /// replace it.
    pub value: V,
    hits: u64,
}

impl<V> Item<V> {
    /// Key this item was counted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of hits the entry had accumulated when this snapshot was taken.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

struct Entry<V> {
    key: String,
    value: V,
    hits: u64,
    // Insertion sequence number, breaks ordering ties in favor of the
    // earlier-seen key.
    seq: u64,
    // Index into the heap while the entry is pop-eligible.
    pos: Option<usize>,
}

struct Inner<V> {
    slots: Vec<Option<Entry<V>>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    heap: Vec<usize>,
    hits: u64,
    seq: u64,
}

/// Concurrent hit counter with a max-by-hits consumer side.
///
/// All operations take one coarse lock; none of them block beyond it.
pub struct Queue<V> {
    inner: Mutex<Inner<V>>,
}

impl<V> Default for Queue<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Queue<V> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                index: HashMap::new(),
                heap: Vec::new(),
                hits: 0,
                seq: 0,
            }),
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total number of hits observed over the queue's lifetime.
    ///
    /// Popping or folding entries does not roll this back.
    pub fn hits(&self) -> u64 {
        self.locked().hits
    }

    /// Number of entries currently eligible for `pop`.
    pub fn len(&self) -> usize {
        self.locked().heap.len()
    }

    /// True when no entry is eligible for `pop`.
    pub fn is_empty(&self) -> bool {
        self.locked().heap.is_empty()
    }

    /// Marks `key` as released: takes it out of `pop`/`peek` contention
    /// while keeping its hit count. A later hit or `release` puts it back.
    pub fn park(&self, key: &str) {
        let mut inner = self.locked();
        if let Some(slot) = inner.index.get(key).copied() {
            if let Some(pos) = inner.slots[slot].as_ref().and_then(|e| e.pos) {
                inner.heap_remove(pos);
            }
        }
    }

    /// Drops `key` entirely. Its accumulated hits are lost; the aggregate
    /// counter keeps them.
    pub fn fold(&self, key: &str) {
        let mut inner = self.locked();
        if let Some(slot) = inner.index.remove(key) {
            if let Some(pos) = inner.slots[slot].as_ref().and_then(|e| e.pos) {
                inner.heap_remove(pos);
            }
            inner.slots[slot] = None;
            inner.free.push(slot);
        }
    }
}

impl<V: Clone> Queue<V> {
    /// Registers a hit for `key`.
    ///
    /// A first hit inserts the entry with the given payload; subsequent hits
    /// only bump the counter. Hitting a popped or released entry makes it
    /// pop-eligible again.
    pub fn hit(&self, key: &str, value: V) {
        let mut inner = self.locked();
        inner.hits += 1;
        match inner.index.get(key).copied() {
            Some(slot) => {
                let entry = inner.slots[slot]
                    .as_mut()
                    .expect("indexed slot must be occupied");
                entry.hits += 1;
                match entry.pos {
                    Some(pos) => inner.sift_up(pos),
                    None => inner.heap_push(slot),
                }
            }
            None => {
                let seq = inner.seq;
                inner.seq += 1;
                let entry = Entry {
                    key: key.to_owned(),
                    value,
                    hits: 1,
                    seq,
                    pos: None,
                };
                let slot = match inner.free.pop() {
                    Some(slot) => {
                        inner.slots[slot] = Some(entry);
                        slot
                    }
                    None => {
                        inner.slots.push(Some(entry));
                        inner.slots.len() - 1
                    }
                };
                inner.index.insert(key.to_owned(), slot);
                inner.heap_push(slot);
            }
        }
    }

    /// Returns the hottest eligible entry without removing it.
    pub fn peek(&self) -> Option<Item<V>> {
        let inner = self.locked();
        inner.heap.first().map(|&slot| inner.item(slot))
    }

    /// Removes and returns the hottest eligible entry.
    ///
    /// The entry keeps its hit count off to the side; `release` or a later
    /// hit brings it back, `fold` forgets it.
    pub fn pop(&self) -> Option<Item<V>> {
        let mut inner = self.locked();
        if inner.heap.is_empty() {
            return None;
        }
        let slot = inner.heap[0];
        inner.heap_remove(0);
        Some(inner.item(slot))
    }

    /// Puts a previously popped entry back into contention with its
    /// accumulated hits. Unknown or already eligible keys are left alone.
    pub fn release(&self, key: &str) {
        let mut inner = self.locked();
        if let Some(slot) = inner.index.get(key).copied() {
            let eligible = inner.slots[slot].as_ref().and_then(|e| e.pos).is_some();
            if !eligible {
                inner.heap_push(slot);
            }
        }
    }
}

impl<V> Inner<V> {
    fn entry(&self, slot: usize) -> &Entry<V> {
        self.slots[slot].as_ref().expect("slot must be occupied")
    }

    // True when the entry in `a` outranks the entry in `b`.
    fn outranks(&self, a: usize, b: usize) -> bool {
        let (ea, eb) = (self.entry(a), self.entry(b));
        ea.hits > eb.hits || (ea.hits == eb.hits && ea.seq < eb.seq)
    }

    fn set_pos(&mut self, heap_idx: usize) {
        let slot = self.heap[heap_idx];
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.pos = Some(heap_idx);
        }
    }

    fn heap_swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.set_pos(a);
        self.set_pos(b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.outranks(self.heap[idx], self.heap[parent]) {
                break;
            }
            self.heap_swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let mut best = idx;
            for child in [2 * idx + 1, 2 * idx + 2] {
                if child < self.heap.len() && self.outranks(self.heap[child], self.heap[best]) {
                    best = child;
                }
            }
            if best == idx {
                break;
            }
            self.heap_swap(idx, best);
            idx = best;
        }
    }

    fn heap_push(&mut self, slot: usize) {
        self.heap.push(slot);
        let idx = self.heap.len() - 1;
        self.set_pos(idx);
        self.sift_up(idx);
    }

    fn heap_remove(&mut self, idx: usize) {
        let slot = self.heap[idx];
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.pos = None;
        }
        let last = self.heap.len() - 1;
        if idx != last {
            self.heap_swap(idx, last);
        }
        self.heap.pop();
        if idx < self.heap.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
    }
}

impl<V: Clone> Inner<V> {
    fn item(&self, slot: usize) -> Item<V> {
        let entry = self.entry(slot);
        Item {
            key: entry.key.clone(),
            value: entry.value.clone(),
            hits: entry.hits,
        }
    }
}
