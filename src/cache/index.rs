//! Ordered Index Module
//!
//! Key lookup combined with a recency list for LRU eviction.
//!
//! Nodes live in a slot arena and are linked by index, so every operation
//! except full iteration is O(1) without unsafe pointers. The list head is the
//! least recently used entry, the tail the most recently used one.

use std::collections::HashMap;

use crate::cache::CacheEntry;

#[derive(Debug)]
struct Node<V> {
    entry: CacheEntry<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

// == Ordered Index ==
/// Map from key to entry, threaded through a doubly-linked recency order.
///
/// A key is in `slots_by_key` exactly when its node is linked into the list.
/// Locking is the caller's job.
#[derive(Debug)]
pub struct OrderedIndex<V> {
    slots_by_key: HashMap<String, usize>,
    arena: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> Default for OrderedIndex<V> {
    fn default() -> Self {
        Self {
            slots_by_key: HashMap::new(),
            arena: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }
}

impl<V> OrderedIndex<V> {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots_by_key.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots_by_key.contains_key(key)
    }

    // == Insert Or Update ==
    /// Stores `entry` at the most recently used end.
    ///
    /// An existing entry under the same key is replaced and returned.
    pub fn insert_or_update(&mut self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        if let Some(&idx) = self.slots_by_key.get(&entry.key) {
            let old = std::mem::replace(&mut self.node_mut(idx).entry, entry);
            self.move_to_tail(idx);
            return Some(old);
        }

        let key = entry.key.clone();
        let idx = self.alloc_slot(entry);
        self.push_tail(idx);
        self.slots_by_key.insert(key, idx);
        None
    }

    // == Lookup ==
    pub fn get(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.slots_by_key
            .get(key)
            .map(|&idx| &self.node(idx).entry)
    }

    /// Mutable access without changing the recency order.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry<V>> {
        let idx = *self.slots_by_key.get(key)?;
        Some(&mut self.node_mut(idx).entry)
    }

    // == Touch ==
    /// Moves `key` to the most recently used end. Returns false if absent.
    pub fn touch(&mut self, key: &str) -> bool {
        match self.slots_by_key.get(key) {
            Some(&idx) => {
                self.move_to_tail(idx);
                true
            }
            None => false,
        }
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let idx = self.slots_by_key.remove(key)?;
        Some(self.release(idx))
    }

    // == Oldest ==
    /// The least recently used entry, the next eviction candidate.
    pub fn oldest(&self) -> Option<&CacheEntry<V>> {
        self.head.map(|idx| &self.node(idx).entry)
    }

    /// Unlinks and returns the least recently used entry.
    pub fn pop_oldest(&mut self) -> Option<CacheEntry<V>> {
        let idx = self.head?;
        let entry = self.release(idx);
        self.slots_by_key.remove(&entry.key);
        Some(entry)
    }

    // == Keys ==
    /// Snapshot of all keys, least recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|entry| entry.key.clone()).collect()
    }

    /// Iterates entries from least to most recently used.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            arena: &self.arena,
            current: self.head,
            remaining: self.len(),
        }
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.slots_by_key.clear();
        self.arena.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    // --- Internal linked-list operations ---

    fn node(&self, idx: usize) -> &Node<V> {
        self.arena[idx]
            .as_ref()
            .unwrap_or_else(|| panic!("slot {idx} is mapped but empty"))
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<V> {
        self.arena[idx]
            .as_mut()
            .unwrap_or_else(|| panic!("slot {idx} is mapped but empty"))
    }

    fn alloc_slot(&mut self, entry: CacheEntry<V>) -> usize {
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = Some(node);
                idx
            }
            None => {
                self.arena.push(Some(node));
                self.arena.len() - 1
            }
        }
    }

    /// Unlinks the node at `idx` and frees its slot. The map is left alone.
    fn release(&mut self, idx: usize) -> CacheEntry<V> {
        self.unlink(idx);
        let node = self.arena[idx]
            .take()
            .unwrap_or_else(|| panic!("slot {idx} released twice"));
        self.free.push(idx);
        node.entry
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev.take(), node.next.take())
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_tail(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(idx);
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => self.node_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_tail(idx);
    }
}

/// Iterator from least to most recently used.
pub struct Iter<'a, V> {
    arena: &'a [Option<Node<V>>],
    current: Option<usize>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a CacheEntry<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.arena[self.current?].as_ref()?;
        self.current = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some(&node.entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
