//! Ordered sequence view over a map keyed by id.
//!
//! Pushed change-feed rows and backfill pages can deliver the same row
//! more than once (overlapping subscribe windows, refetch races). The
//! held lists for messages and notifications therefore merge by id:
//! insert-if-absent is O(1) and insertion order is preserved, instead
//! of a linear scan per pushed row.

use std::collections::HashMap;
use std::hash::Hash;

/// An insertion-ordered list deduplicated by key.
#[derive(Debug, Clone)]
pub struct OrderedLog<K, V> {
    order: Vec<K>,
    by_id: HashMap<K, V>,
}

// Derived `Default` would bound `K: Default` and `V: Default`; an empty
// log needs neither.
impl<K, V> Default for OrderedLog<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<K, V> OrderedLog<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.by_id.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.by_id.get(key)
    }

    /// Append at the tail unless the key is already held.
    /// Returns `false` on a duplicate (no-op).
    pub fn push_back(&mut self, key: K, value: V) -> bool {
        if self.by_id.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.by_id.insert(key, value);
        true
    }

    /// Insert at the head unless the key is already held.
    pub fn push_front(&mut self, key: K, value: V) -> bool {
        if self.by_id.contains_key(&key) {
            return false;
        }
        self.order.insert(0, key.clone());
        self.by_id.insert(key, value);
        true
    }

    /// Prepend a page of entries, preserving the page's own order and
    /// skipping keys already held. Used for older-message backfill.
    pub fn prepend_page<I>(&mut self, page: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut fresh: Vec<K> = Vec::new();
        for (key, value) in page {
            if self.by_id.contains_key(&key) {
                continue;
            }
            fresh.push(key.clone());
            self.by_id.insert(key, value);
        }
        fresh.extend(self.order.drain(..));
        self.order = fresh;
    }

    /// Drop everything held and take the given entries as the new
    /// contents (duplicates within the input keep the first value).
    pub fn replace_all<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.order.clear();
        self.by_id.clear();
        for (key, value) in entries {
            self.push_back(key, value);
        }
    }

    /// Remove an entry, returning its value if it was held.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.by_id.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Mutate one entry in place. Returns `false` if the key is absent.
    pub fn update<F>(&mut self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.by_id.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Mutate every entry in place, in order.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut V),
    {
        for key in &self.order {
            if let Some(value) = self.by_id.get_mut(key) {
                f(value);
            }
        }
    }

    /// Iterate values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.order.iter().filter_map(|k| self.by_id.get(k))
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.by_id.clear();
    }
}

impl<K, V> OrderedLog<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Snapshot the values in insertion order.
    pub fn to_vec(&self) -> Vec<V> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_back_dedups_by_key() {
        let mut log = OrderedLog::new();
        assert!(log.push_back(1, "a"));
        assert!(!log.push_back(1, "b"));
        assert_eq!(log.to_vec(), vec!["a"]);
    }

    #[test]
    fn prepend_page_keeps_page_order_and_skips_held() {
        let mut log = OrderedLog::new();
        log.push_back(3, "c");
        log.push_back(4, "d");
        log.prepend_page(vec![(1, "a"), (2, "b"), (3, "dup")]);
        assert_eq!(log.to_vec(), vec!["a", "b", "c", "d"]);
        assert_eq!(log.get(&3), Some(&"c"));
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut log = OrderedLog::new();
        log.push_back(1, "a");
        log.push_back(2, "b");
        log.push_back(3, "c");
        assert_eq!(log.remove(&2), Some("b"));
        assert_eq!(log.remove(&2), None);
        assert_eq!(log.to_vec(), vec!["a", "c"]);
    }

    #[test]
    fn update_mutates_in_place() {
        let mut log = OrderedLog::new();
        log.push_back(1, 10);
        assert!(log.update(&1, |v| *v += 1));
        assert!(!log.update(&2, |v| *v += 1));
        assert_eq!(log.get(&1), Some(&11));
    }

    #[test]
    fn default_needs_no_bounds_on_the_value() {
        // Held rows (messages, notifications) have no Default of their own.
        struct Row(#[allow(dead_code)] String);
        let log: OrderedLog<u32, Row> = OrderedLog::default();
        assert!(log.is_empty());
    }

    #[test]
    fn replace_all_resets_contents() {
        let mut log = OrderedLog::new();
        log.push_back(1, "a");
        log.replace_all(vec![(5, "e"), (6, "f")]);
        assert!(!log.contains(&1));
        assert_eq!(log.to_vec(), vec!["e", "f"]);
    }
}
