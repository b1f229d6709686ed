//! Bounded in-memory header cache.
//!
//! Holds headers for heights at or beyond the last durable block so that
//! pre-finality consumers can look up recent headers without touching the
//! engine. Eviction is purely by height arithmetic (the cache covers a
//! contiguous trailing window, never an LRU set), so consumers know exactly
//! which heights are guaranteed present.
//!
//! The cache is an optimization layer only: a miss means "fall back to the
//! durable path", never corruption.

use std::collections::{BTreeMap, HashMap};

use quill_core::types::{Hash256, Header};

/// Bounded window of recent headers, indexed by hash and by height.
#[derive(Debug, Default)]
pub struct HeaderCache {
    headers: HashMap<Hash256, Header>,
    by_height: BTreeMap<u64, Hash256>,
    current_height: u64,
    current_hash: Hash256,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a header. Tracks the highest cached height.
    pub fn insert(&mut self, header: Header) {
        let hash = header.hash();
        let height = header.height;

        if let Some(stale) = self.by_height.insert(height, hash) {
            self.headers.remove(&stale);
        }
        self.headers.insert(hash, header);

        if height >= self.current_height {
            self.current_height = height;
            self.current_hash = hash;
        }
    }

    /// Evict the header at a height. Used only to cap the window size.
    pub fn remove_height(&mut self, height: u64) {
        if let Some(hash) = self.by_height.remove(&height) {
            self.headers.remove(&hash);
        }

        if height == self.current_height {
            match self.by_height.iter().next_back() {
                Some((h, hash)) => {
                    self.current_height = *h;
                    self.current_hash = *hash;
                }
                None => {
                    self.current_height = 0;
                    self.current_hash = Hash256::ZERO;
                }
            }
        }
    }

    /// Look up a cached header by hash. A miss is not an error.
    pub fn get(&self, hash: &Hash256) -> Option<Header> {
        self.headers.get(hash).cloned()
    }

    /// The highest height known to the cache.
    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// The hash of the highest cached header.
    pub fn current_hash(&self) -> Hash256 {
        self.current_hash
    }

    /// The cached hash at a height, if that height is in the window.
    pub fn hash_at(&self, height: u64) -> Option<Hash256> {
        self.by_height.get(&height).copied()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_at(height: u64, seed: u8) -> Header {
        Header {
            version: 1,
            prev_hash: Hash256([seed; 32]),
            state_root: Hash256::ZERO,
            tx_root: Hash256::ZERO,
            timestamp: 1_700_000_000 + height,
            height,
            signer: vec![],
            signature: vec![],
        }
    }

    #[test]
    fn insert_and_lookup_by_hash() {
        let mut cache = HeaderCache::new();
        let header = header_at(3, 0x01);
        let hash = header.hash();

        cache.insert(header.clone());
        assert_eq!(cache.get(&hash), Some(header));
        assert_eq!(cache.get(&Hash256([0xFF; 32])), None);
    }

    #[test]
    fn tracks_highest_cached_height() {
        let mut cache = HeaderCache::new();
        cache.insert(header_at(5, 0x01));
        cache.insert(header_at(7, 0x02));
        cache.insert(header_at(6, 0x03));

        assert_eq!(cache.current_height(), 7);
        assert_eq!(cache.current_hash(), header_at(7, 0x02).hash());
    }

    #[test]
    fn hash_at_height_within_window() {
        let mut cache = HeaderCache::new();
        let header = header_at(4, 0x01);
        let hash = header.hash();
        cache.insert(header);

        assert_eq!(cache.hash_at(4), Some(hash));
        assert_eq!(cache.hash_at(5), None);
    }

    #[test]
    fn eviction_removes_both_indexes() {
        let mut cache = HeaderCache::new();
        let header = header_at(2, 0x01);
        let hash = header.hash();
        cache.insert(header);
        cache.insert(header_at(3, 0x02));

        cache.remove_height(2);
        assert_eq!(cache.get(&hash), None);
        assert_eq!(cache.hash_at(2), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_height(), 3);
    }

    #[test]
    fn evicting_highest_falls_back_to_next() {
        let mut cache = HeaderCache::new();
        cache.insert(header_at(2, 0x01));
        cache.insert(header_at(3, 0x02));

        cache.remove_height(3);
        assert_eq!(cache.current_height(), 2);
        assert_eq!(cache.current_hash(), header_at(2, 0x01).hash());

        cache.remove_height(2);
        assert!(cache.is_empty());
        assert_eq!(cache.current_height(), 0);
        assert_eq!(cache.current_hash(), Hash256::ZERO);
    }

    #[test]
    fn reinserting_height_overwrites_old_entry() {
        let mut cache = HeaderCache::new();
        let old = header_at(5, 0x01);
        let new = header_at(5, 0x02);
        cache.insert(old.clone());
        cache.insert(new.clone());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&old.hash()), None);
        assert_eq!(cache.get(&new.hash()), Some(new.clone()));
        assert_eq!(cache.hash_at(5), Some(new.hash()));
    }

    #[test]
    fn removing_missing_height_is_noop() {
        let mut cache = HeaderCache::new();
        cache.insert(header_at(1, 0x01));
        cache.remove_height(9);
        assert_eq!(cache.len(), 1);
    }
}
