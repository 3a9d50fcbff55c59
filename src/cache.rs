//! Bounded LRU cache for computed match lists.
//!
//! Keys derive from a fingerprint's raw-hash encoding, truncated to a fixed
//! length so key cost stays bounded while same-length fingerprints keep
//! strong collision resistance. The cache itself is not synchronized; the
//! matcher service wraps it in a single mutex so that lookup and recency
//! updates happen in one critical section.

use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;

use crate::fingerprint::Fingerprint;
use crate::store::MatchResult;

/// Maximum cache-key length in characters.
pub const MAX_KEY_LEN: usize = 64;

/// Derive the cache key for a query fingerprint: the whole raw-hash encoding,
/// or its first [`MAX_KEY_LEN`] bytes for long fingerprints.
///
/// Generated raw hashes are lowercase hex, but a deserialized request can
/// carry any string; truncation backs off to the nearest char boundary so a
/// multi-byte character straddling the cut never panics.
pub fn cache_key(fingerprint: &Fingerprint) -> String {
    let raw = &fingerprint.raw_hash;
    if raw.len() <= MAX_KEY_LEN {
        return raw.clone();
    }
    let mut end = MAX_KEY_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

struct CacheEntry {
    results: Vec<MatchResult>,
    touched: Instant,
}

/// Fixed-capacity LRU map from cache key to match list.
///
/// `get` and `put` are O(1) amortized. Capacity 0 disables caching entirely
/// (every `put` is dropped); callers should normally use the service's
/// `caching_enabled` flag instead of a zero capacity.
pub struct ResultCache {
    entries: Option<LruCache<String, CacheEntry>>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            capacity,
        }
    }

    /// Look up a key, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &str) -> Option<Vec<MatchResult>> {
        let entry = self.entries.as_mut()?.get_mut(key)?;
        entry.touched = Instant::now();
        Some(entry.results.clone())
    }

    /// Insert as most-recently-used, evicting the least-recently-used entry
    /// first when at capacity.
    pub fn put(&mut self, key: String, results: Vec<MatchResult>) {
        if let Some(entries) = &mut self.entries {
            entries.put(
                key,
                CacheEntry {
                    results,
                    touched: Instant::now(),
                },
            );
        }
    }

    pub fn clear(&mut self) {
        if let Some(entries) = &mut self.entries {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// When the entry was last inserted or hit, without promoting it.
    pub fn last_touched(&self, key: &str) -> Option<Instant> {
        self.entries.as_ref()?.peek(key).map(|entry| entry.touched)
    }
}
