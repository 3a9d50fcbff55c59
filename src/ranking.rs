//! Candidate aggregation and ranking over hash votes.
//!
//! Every hash in the query fingerprint (duplicates included) is looked up in
//! the store; each candidate accumulates one vote per stored occurrence per
//! query occurrence. Candidates are then scored with a vote-density
//! approximation, `votes / max(query_len, stored_len)`, instead of a full
//! Hamming comparison against every stored fingerprint. The approximation is
//! a deliberate cost/accuracy trade-off and is kept distinct from
//! [`Fingerprint::similarity`](crate::fingerprint::Fingerprint::similarity):
//! the two scores are not numerically comparable across contexts.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::fingerprint::Fingerprint;
use crate::store::{FingerprintStore, MatchResult, StoreError};

/// Rank stored candidates against a query fingerprint.
///
/// Returns matches sorted by descending score, ties kept in first-seen order,
/// truncated to `max_results`. An empty query yields an empty list. A
/// candidate whose stored record or metadata disappeared between the vote
/// query and retrieval (deleted concurrently) is skipped, not an error.
pub fn rank<S>(
    query: &Fingerprint,
    min_similarity: f64,
    max_results: usize,
    store: &S,
) -> Result<Vec<MatchResult>, StoreError>
where
    S: FingerprintStore + ?Sized,
{
    if query.hashes.is_empty() {
        return Ok(Vec::new());
    }

    // Accumulate votes per content id, remembering first-seen order so that
    // equal scores rank deterministically.
    let mut order: Vec<String> = Vec::new();
    let mut votes: HashMap<String, u32> = HashMap::new();

    for &hash in &query.hashes {
        for vote in store.query_by_hash(hash)? {
            match votes.entry(vote.content_id) {
                Entry::Occupied(mut entry) => *entry.get_mut() += vote.votes,
                Entry::Vacant(entry) => {
                    order.push(entry.key().clone());
                    entry.insert(vote.votes);
                }
            }
        }
    }

    let mut results = Vec::new();
    for content_id in &order {
        let vote_total = votes[content_id];

        let Some(stored) = store.stored_fingerprint(content_id)? else {
            continue;
        };
        let denominator = query.hashes.len().max(stored.hash_count);
        if denominator == 0 {
            continue;
        }

        let similarity = f64::from(vote_total) / denominator as f64;
        if similarity < min_similarity {
            continue;
        }

        let Some(metadata) = store.get_content_by_id(content_id)? else {
            continue;
        };
        results.push(MatchResult {
            metadata,
            similarity_score: similarity,
            matched_segments: vote_total,
        });
    }

    // Stable sort preserves insertion order among equal scores.
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(max_results);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ContentMetadata, MemoryStore};
    use chrono::Utc;

    fn metadata(content_id: &str) -> ContentMetadata {
        ContentMetadata {
            id: 0,
            content_id: content_id.to_string(),
            title: content_id.to_uppercase(),
            source: "test".to_string(),
            duration_ms: 1_000,
            created_at: Utc::now(),
        }
    }

    fn fingerprint(hashes: Vec<u32>) -> Fingerprint {
        let raw_hash = hashes.iter().map(|h| format!("{h:08x}")).collect();
        Fingerprint {
            hashes,
            duration_ms: 1_000,
            raw_hash,
        }
    }

    fn populated_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .store_fingerprint("exact", &fingerprint(vec![1, 2, 3, 4]), &metadata("exact"))
            .unwrap();
        store
            .store_fingerprint("partial", &fingerprint(vec![1, 2, 9, 9]), &metadata("partial"))
            .unwrap();
        store
            .store_fingerprint("unrelated", &fingerprint(vec![7, 8]), &metadata("unrelated"))
            .unwrap();
        store
    }

    #[test]
    fn exact_candidate_ranks_first() {
        let store = populated_store();
        let query = fingerprint(vec![1, 2, 3, 4]);

        let results = rank(&query, 0.4, 10, &store).unwrap();
        assert_eq!(results[0].metadata.content_id, "exact");
        assert_eq!(results[0].similarity_score, 1.0);
        assert_eq!(results[0].matched_segments, 4);
        // "partial" matched 2 of 4 hashes.
        assert_eq!(results[1].metadata.content_id, "partial");
        assert_eq!(results[1].similarity_score, 0.5);
        // "unrelated" got no votes at all.
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn threshold_filters_candidates() {
        let store = populated_store();
        let query = fingerprint(vec![1, 2, 3, 4]);

        let results = rank(&query, 0.75, 10, &store).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.content_id, "exact");
    }

    #[test]
    fn max_results_truncates() {
        let store = populated_store();
        let query = fingerprint(vec![1, 2, 3, 4]);

        let results = rank(&query, 0.0, 1, &store).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.content_id, "exact");
    }

    #[test]
    fn empty_query_yields_empty_list() {
        let store = populated_store();
        let results = rank(&Fingerprint::default(), 0.0, 10, &store).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn duplicate_query_hashes_accumulate_votes() {
        let store = MemoryStore::new();
        store
            .store_fingerprint("dup", &fingerprint(vec![5, 5]), &metadata("dup"))
            .unwrap();

        // Each of the two query occurrences of hash 5 picks up both stored
        // occurrences: 4 votes over max(2, 2) hashes.
        let results = rank(&fingerprint(vec![5, 5]), 0.0, 10, &store).unwrap();
        assert_eq!(results[0].matched_segments, 4);
        assert_eq!(results[0].similarity_score, 2.0);
    }

    #[test]
    fn longer_stored_fingerprint_dilutes_score() {
        let store = MemoryStore::new();
        store
            .store_fingerprint(
                "long",
                &fingerprint(vec![1, 2, 10, 11, 12, 13, 14, 15]),
                &metadata("long"),
            )
            .unwrap();

        let results = rank(&fingerprint(vec![1, 2]), 0.0, 10, &store).unwrap();
        // 2 votes over max(2, 8) stored hashes.
        assert_eq!(results[0].similarity_score, 0.25);
    }
}
