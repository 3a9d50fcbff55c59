//! Indexed store boundary: persistence of fingerprints and content metadata,
//! plus the hash-vote query primitive the ranking algorithm drives.
//!
//! The matcher core treats the store as a black box behind
//! [`FingerprintStore`]. Implementations must make each call atomic from the
//! caller's perspective — a concurrent reader never observes metadata without
//! its hashes or vice versa — and must be safe for concurrent reads.
//! [`MemoryStore`] is the reference backend used by tests, benchmarks, and
//! embedders that do not need durability.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::ranking;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Descriptive record for one piece of registered content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Backend-assigned numeric id; 0 when not yet assigned.
    pub id: i64,
    pub content_id: String,
    pub title: String,
    pub source: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// One ranked match returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub metadata: ContentMetadata,
    pub similarity_score: f64,
    /// Number of query hashes that hit this candidate in the index.
    pub matched_segments: u32,
}

/// Per-candidate vote count for a single query hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashVote {
    pub content_id: String,
    /// How many stored positions of this candidate carry the queried hash.
    pub votes: u32,
}

/// Raw-hash record kept alongside the postings, used by the ranking
/// algorithm's vote-density score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFingerprint {
    pub raw_hash: String,
    pub hash_count: usize,
}

/// Aggregate store counters for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub fingerprint_count: u64,
    pub content_count: u64,
    pub storage_size_bytes: u64,
}

/// Persistence and query contract consumed by the matcher core.
pub trait FingerprintStore: Send + Sync {
    /// Persist a fingerprint with its metadata. Must be atomic: partial
    /// writes are never observable. Re-registering a content id replaces the
    /// previous fingerprint entirely.
    fn store_fingerprint(
        &self,
        content_id: &str,
        fingerprint: &Fingerprint,
        metadata: &ContentMetadata,
    ) -> Result<(), StoreError>;

    /// All candidates whose stored fingerprints contain `hash`, each with the
    /// number of stored occurrences of that hash.
    fn query_by_hash(&self, hash: u32) -> Result<Vec<HashVote>, StoreError>;

    /// The stored raw-hash record for a candidate, if it still exists.
    fn stored_fingerprint(&self, content_id: &str) -> Result<Option<StoredFingerprint>, StoreError>;

    fn get_content_by_id(&self, content_id: &str) -> Result<Option<ContentMetadata>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Ranked, thresholded matches for a query fingerprint.
    ///
    /// The default implementation drives [`ranking::rank`] over
    /// [`query_by_hash`](Self::query_by_hash); backends with a native ranked
    /// query may override it as long as they honor the same contract.
    fn find_matches(
        &self,
        query: &Fingerprint,
        min_similarity: f64,
        max_results: usize,
    ) -> Result<Vec<MatchResult>, StoreError> {
        ranking::rank(query, min_similarity, max_results, self)
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    /// hash → (content id → occurrence count).
    postings: HashMap<u32, HashMap<String, u32>>,
    fingerprints: HashMap<String, StoredFingerprint>,
    content: HashMap<String, ContentMetadata>,
    next_id: i64,
}

/// In-memory reference backend.
///
/// A single `RwLock` over the whole state gives every call the atomicity the
/// trait demands; readers proceed concurrently.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FingerprintStore for MemoryStore {
    fn store_fingerprint(
        &self,
        content_id: &str,
        fingerprint: &Fingerprint,
        metadata: &ContentMetadata,
    ) -> Result<(), StoreError> {
        if content_id.is_empty() {
            return Err(StoreError::Constraint("content_id must not be empty".into()));
        }

        let mut inner = self.write();

        // Upsert: drop the previous postings before inserting the new ones so
        // re-registration never double-counts votes.
        if inner.fingerprints.contains_key(content_id) {
            for counts in inner.postings.values_mut() {
                counts.remove(content_id);
            }
            inner.postings.retain(|_, counts| !counts.is_empty());
        }

        for &hash in &fingerprint.hashes {
            *inner
                .postings
                .entry(hash)
                .or_default()
                .entry(content_id.to_string())
                .or_insert(0) += 1;
        }

        inner.fingerprints.insert(
            content_id.to_string(),
            StoredFingerprint {
                raw_hash: fingerprint.raw_hash.clone(),
                hash_count: fingerprint.hashes.len(),
            },
        );

        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored_meta = metadata.clone();
        stored_meta.id = id;
        stored_meta.content_id = content_id.to_string();
        inner.content.insert(content_id.to_string(), stored_meta);

        tracing::debug!(content_id, hashes = fingerprint.hashes.len(), "stored fingerprint");
        Ok(())
    }

    fn query_by_hash(&self, hash: u32) -> Result<Vec<HashVote>, StoreError> {
        let inner = self.read();
        let mut votes: Vec<HashVote> = inner
            .postings
            .get(&hash)
            .map(|counts| {
                counts
                    .iter()
                    .map(|(content_id, &count)| HashVote {
                        content_id: content_id.clone(),
                        votes: count,
                    })
                    .collect()
            })
            .unwrap_or_default();

        // Deterministic order: strongest candidates first, then content id.
        votes.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.content_id.cmp(&b.content_id)));
        Ok(votes)
    }

    fn stored_fingerprint(&self, content_id: &str) -> Result<Option<StoredFingerprint>, StoreError> {
        Ok(self.read().fingerprints.get(content_id).cloned())
    }

    fn get_content_by_id(&self, content_id: &str) -> Result<Option<ContentMetadata>, StoreError> {
        Ok(self.read().content.get(content_id).cloned())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.read();
        let fingerprint_count = inner
            .postings
            .values()
            .flat_map(|counts| counts.values())
            .map(|&count| u64::from(count))
            .sum();
        let storage_size_bytes = inner
            .fingerprints
            .values()
            .map(|fp| fp.raw_hash.len() as u64)
            .sum::<u64>()
            + inner.postings.len() as u64 * std::mem::size_of::<(u32, String, u32)>() as u64;

        Ok(StoreStats {
            fingerprint_count,
            content_count: inner.content.len() as u64,
            storage_size_bytes,
        })
    }
}
