//! LRU (Least Recently Used) eviction cache
//!
//! Arena of nodes linked by index, so every operation is O(1) amortized.
//! Not synchronized; [`crate::EventStore`] owns the lock.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

use ahash::RandomState;

/// Node in the LRU doubly-linked list
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU cache with fixed capacity
pub struct LruCache<K, V> {
    map: HashMap<K, usize, RandomState>,
    nodes: Vec<Option<Node<K, V>>>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: NonZeroUsize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a new LRU cache with the given capacity
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity.get(), RandomState::new()),
            nodes: Vec::with_capacity(capacity.get()),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
        }
    }

    /// Get a value and promote its key to most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Get a value without touching recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Check whether `key` is cached, without touching recency
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Insert or replace a value, promoting its key to most recently used.
    ///
    /// Returns the evicted entry when a new key pushed the cache past capacity.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(node) = &mut self.nodes[idx] {
                node.value = value;
            }
            self.move_to_front(idx);
            return None;
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });
        self.link_front(idx);
        self.map.insert(key, idx);

        if self.map.len() > self.capacity.get() {
            self.evict()
        } else {
            None
        }
    }

    /// Remove a key from the cache
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        let node = self.nodes[idx].take();
        self.free_list.push(idx);
        node.map(|node| node.value)
    }

    /// Get the current size of the cache
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes[cursor?].as_ref()?;
            cursor = node.next;
            Some(&node.key)
        })
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }

        self.unlink(idx);
        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }
        self.link_front(idx);
    }

    /// Make `idx` the head. The node's own `next` must already point at the old head.
    fn link_front(&mut self, idx: usize) {
        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn evict(&mut self) -> Option<(K, V)> {
        let tail_idx = self.tail?;
        // Unlink while the node is still in the arena
        self.unlink(tail_idx);
        let node = self.nodes[tail_idx].take()?;
        self.map.remove(&node.key);
        self.free_list.push(tail_idx);
        Some((node.key, node.value))
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }
}
