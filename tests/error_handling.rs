//! Failure-path behavior: the response envelope, error counters, and
//! rejection of invalid configuration.

use std::sync::Arc;

use audiomatch::{
    ContentMetadata, Fingerprint, FingerprintStore, HashVote, MatchError, MatchRequest,
    MatcherConfig, MatcherService, MemoryStore, PoolError, StoreError, StoreStats,
    StoredFingerprint,
};

/// Store whose index lookups always fail, standing in for a lost backend.
struct BrokenStore;

impl FingerprintStore for BrokenStore {
    fn store_fingerprint(
        &self,
        _content_id: &str,
        _fingerprint: &Fingerprint,
        _metadata: &ContentMetadata,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("backend offline".into()))
    }

    fn query_by_hash(&self, _hash: u32) -> Result<Vec<HashVote>, StoreError> {
        Err(StoreError::Unavailable("backend offline".into()))
    }

    fn stored_fingerprint(&self, _content_id: &str) -> Result<Option<StoredFingerprint>, StoreError> {
        Err(StoreError::Unavailable("backend offline".into()))
    }

    fn get_content_by_id(&self, _content_id: &str) -> Result<Option<ContentMetadata>, StoreError> {
        Err(StoreError::Unavailable("backend offline".into()))
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(StoreError::Unavailable("backend offline".into()))
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

fn request(id: &str, hashes: Vec<u32>) -> MatchRequest {
    MatchRequest {
        request_id: id.to_string(),
        fingerprint: fingerprint(hashes),
        min_similarity: None,
        max_results: None,
    }
}

fn broken_service() -> MatcherService {
    MatcherService::new(
        MatcherConfig {
            worker_count: 2,
            ..MatcherConfig::default()
        },
        Arc::new(BrokenStore),
    )
    .unwrap()
}

#[test]
fn failed_request_returns_structured_response() {
    let service = broken_service();
    let response = service.match_request(request("broken", vec![1, 2, 3]));

    assert!(!response.success);
    assert!(response.matches.is_empty());
    let error = response.error.expect("failure must carry an error message");
    assert!(error.contains("backend offline"));
    assert_eq!(response.request_id, "broken");
}

#[test]
fn failures_are_counted_and_latency_still_recorded() {
    let service = broken_service();
    for i in 0..3 {
        service.match_request(request(&format!("r{i}"), vec![i]));
    }

    assert_eq!(service.metrics().counter("match_errors"), 3);
    let stats = service.stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.successful_matches, 0);
    assert_eq!(service.metrics().latency_stats("match_total").count, 3);
}

#[test]
fn failed_results_are_never_cached() {
    let service = broken_service();
    service.match_request(request("r1", vec![1, 2]));
    service.match_request(request("r2", vec![1, 2]));

    // Identical queries, but the failure was not memoized.
    assert_eq!(service.cached_entries(), 0);
    assert_eq!(service.stats().cache_misses, 2);
    assert_eq!(service.metrics().counter("match_errors"), 2);
}

/// Delegates to a [`MemoryStore`] but fails index lookups for one poisoned
/// hash value, to exercise per-request failure isolation.
struct FlakyStore {
    inner: MemoryStore,
    poisoned_hash: u32,
}

impl FingerprintStore for FlakyStore {
    fn store_fingerprint(
        &self,
        content_id: &str,
        fingerprint: &Fingerprint,
        metadata: &ContentMetadata,
    ) -> Result<(), StoreError> {
        self.inner.store_fingerprint(content_id, fingerprint, metadata)
    }

    fn query_by_hash(&self, hash: u32) -> Result<Vec<HashVote>, StoreError> {
        if hash == self.poisoned_hash {
            return Err(StoreError::Backend("index shard unreachable".into()));
        }
        self.inner.query_by_hash(hash)
    }

    fn stored_fingerprint(&self, content_id: &str) -> Result<Option<StoredFingerprint>, StoreError> {
        self.inner.stored_fingerprint(content_id)
    }

    fn get_content_by_id(&self, content_id: &str) -> Result<Option<ContentMetadata>, StoreError> {
        self.inner.get_content_by_id(content_id)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats()
    }
}

#[test]
fn batch_isolates_failures_per_request() {
    let store = FlakyStore {
        inner: MemoryStore::new(),
        poisoned_hash: 0xdead_beef,
    };
    store
        .store_fingerprint(
            "good",
            &fingerprint(vec![1, 2]),
            &ContentMetadata {
                id: 0,
                content_id: "good".to_string(),
                title: "Good".to_string(),
                source: "test".to_string(),
                duration_ms: 1_000,
                created_at: chrono::Utc::now(),
            },
        )
        .unwrap();

    let service = MatcherService::new(
        MatcherConfig {
            worker_count: 2,
            default_min_similarity: 0.5,
            ..MatcherConfig::default()
        },
        Arc::new(store),
    )
    .unwrap();

    let responses = service.match_batch(vec![
        request("a", vec![1, 2]),
        request("b", vec![0xdead_beef]),
        request("c", vec![1, 2, 3, 4]),
    ]);

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].request_id, "a");
    assert!(responses[0].success);
    assert_eq!(responses[0].matches[0].metadata.content_id, "good");

    // The poisoned request fails alone.
    assert!(!responses[1].success);
    assert!(responses[1].matches.is_empty());
    assert!(responses[1].error.as_deref().unwrap().contains("index shard"));

    assert!(responses[2].success);
}

#[test]
fn indexing_against_broken_store_surfaces_store_error() {
    let service = broken_service();
    let audio = audiomatch::AudioBuffer::new(vec![0.0; 8_192], 8_000, 1);
    let err = service
        .index_content("x", &audio, "X", "test")
        .unwrap_err();
    assert!(matches!(err, MatchError::Store(StoreError::Unavailable(_))));
}

#[test]
fn async_submission_after_shutdown_is_rejected() {
    let mut service = broken_service();
    service.shutdown();
    let err = service.match_async(request("late", vec![1])).unwrap_err();
    assert!(matches!(err, PoolError::Stopped));
}

#[test]
fn construction_rejects_invalid_config() {
    let zero_workers = MatcherConfig {
        worker_count: 0,
        ..MatcherConfig::default()
    };
    assert!(matches!(
        MatcherService::new(zero_workers, Arc::new(MemoryStore::new())),
        Err(MatchError::Config(_))
    ));

    let bad_threshold = MatcherConfig {
        default_min_similarity: 1.5,
        ..MatcherConfig::default()
    };
    assert!(matches!(
        MatcherService::new(bad_threshold, Arc::new(MemoryStore::new())),
        Err(MatchError::Config(_))
    ));
}
