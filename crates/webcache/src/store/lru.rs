//! Recency ordering of cache keys.

use std::collections::{BTreeMap, HashMap};

use crate::key::CacheKey;

/// Keys ordered from least to most recently used.
///
/// Each key carries a monotonically increasing stamp; moving a key to the
/// tail re-stamps it, so every operation is logarithmic.
#[derive(Debug, Default, Clone)]
pub struct LruOrder {
    next_stamp: u64,
    by_stamp: BTreeMap<u64, CacheKey>,
    by_key: HashMap<CacheKey, u64>,
}

impl LruOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `key` to the most-recently-used end, inserting it if absent.
    pub fn touch(&mut self, key: &CacheKey) {
        if let Some(stamp) = self.by_key.get(key) {
            self.by_stamp.remove(stamp);
        }
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.by_stamp.insert(stamp, key.clone());
        self.by_key.insert(key.clone(), stamp);
    }

    /// Append `key` at the tail unless it is already ordered.
    pub fn insert_if_absent(&mut self, key: &CacheKey) -> bool {
        if self.by_key.contains_key(key) {
            return false;
        }
        self.touch(key);
        true
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.by_key.remove(key) {
            Some(stamp) => {
                self.by_stamp.remove(&stamp);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn least_recent(&self) -> Option<&CacheKey> {
        self.by_stamp.values().next()
    }

    /// Keys from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.by_stamp.values()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_stamp.clear();
        self.by_key.clear();
    }
}
