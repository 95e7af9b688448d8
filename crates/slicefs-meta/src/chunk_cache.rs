//! LRU cache of visible slice lists for open files.

use std::collections::HashMap;
use std::hash::Hash;

use crate::types::{Ino, Slice};

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

const NONE: usize = usize::MAX;

/// LRU cache with O(1) get/put: a HashMap of slots plus a doubly-linked list
/// threaded through a slab. Freed slots are reused.
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity.min(4096)),
            slots: Vec::new(),
            free: Vec::new(),
            head: NONE,
            tail: NONE,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.push_front(idx);
        self.slots[idx].as_ref().map(|n| &n.value)
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(&idx) = self.map.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.value = value;
            }
            self.detach(idx);
            self.push_front(idx);
            return;
        }
        if self.map.len() >= self.capacity && self.tail != NONE {
            let tail = self.tail;
            self.take(tail);
        }
        let node = Node {
            key: key.clone(),
            value,
            prev: NONE,
            next: NONE,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.push_front(idx);
        self.map.insert(key, idx);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.take(idx)
    }

    /// Remove every entry whose key matches `pred`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let doomed: Vec<usize> = self
            .map
            .iter()
            .filter(|(k, _)| !keep(k))
            .map(|(_, &idx)| idx)
            .collect();
        for idx in doomed {
            self.take(idx);
        }
    }

    fn take(&mut self, idx: usize) -> Option<V> {
        self.detach(idx);
        let node = self.slots[idx].take()?;
        self.map.remove(&node.key);
        self.free.push(idx);
        Some(node.value)
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        if prev != NONE {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = next;
            }
        } else if self.head == idx {
            self.head = next;
        }
        if next != NONE {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = prev;
            }
        } else if self.tail == idx {
            self.tail = prev;
        }
        if let Some(n) = self.slots[idx].as_mut() {
            n.prev = NONE;
            n.next = NONE;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(n) = self.slots[idx].as_mut() {
            n.prev = NONE;
            n.next = old_head;
        }
        if old_head != NONE {
            if let Some(h) = self.slots[old_head].as_mut() {
                h.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NONE {
            self.tail = idx;
        }
    }
}

/// Visible slices keyed by `(inode, chunk index)`.
pub type ChunkCache = LruCache<(Ino, u32), Vec<Slice>>;

/// Drop every cached chunk of `ino`.
pub fn invalidate_inode(cache: &mut ChunkCache, ino: Ino) {
    cache.retain(|(i, _)| *i != ino);
}
