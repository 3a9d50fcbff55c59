//! Matcher service: request orchestration over the generator, cache, store,
//! pool, and metrics.
//!
//! # Purpose
//! A [`MatcherService`] owns one result cache, one worker pool, and one
//! metrics collector, and borrows a store through `Arc<dyn FingerprintStore>`.
//! Nothing is process-global, so independent services coexist in one process
//! without sharing caches or counters.
//!
//! Requests flow through a single path: count the request, consult the cache,
//! on a miss query the store and cache the outcome, and account latency on
//! every exit. Failed requests always come back as a response with
//! `success == false`, an empty match list, and an error message; the request
//! pipeline itself never returns `Err`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{cache_key, ResultCache};
use crate::config::{ConfigError, MatcherConfig};
use crate::fingerprint::{AudioBuffer, Fingerprint, FingerprintGenerator};
use crate::metrics::{percentile, MetricsCollector};
use crate::pool::{PoolError, TaskHandle, ThreadPool};
use crate::store::{ContentMetadata, FingerprintStore, MatchResult, StoreError};

/// Failures surfaced by service construction and content registration.
///
/// Match processing never surfaces these to callers; it folds errors into the
/// response envelope instead.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One match query against the registered corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    /// Caller-chosen correlation id, echoed back verbatim.
    pub request_id: String,
    pub fingerprint: Fingerprint,
    /// Overrides the configured threshold; clamped to [0.0, 1.0].
    #[serde(default)]
    pub min_similarity: Option<f64>,
    /// Overrides the configured result cap.
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Outcome envelope for one request.
///
/// Invariant: `success == false` implies `matches` is empty and `error` is
/// `Some`; `success == true` implies `error` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub request_id: String,
    pub matches: Vec<MatchResult>,
    pub processing_time_us: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl MatchResponse {
    fn failure(request_id: String, processing_time_us: u64, error: String) -> Self {
        Self {
            request_id,
            matches: Vec::new(),
            processing_time_us,
            success: false,
            error: Some(error),
        }
    }
}

/// Point-in-time service counters and latency summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    pub total_requests: u64,
    pub successful_matches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_latency_us: f64,
    pub p95_latency_us: f64,
    pub p99_latency_us: f64,
}

struct ServiceInner {
    config: MatcherConfig,
    store: Arc<dyn FingerprintStore>,
    generator: FingerprintGenerator,
    cache: Mutex<ResultCache>,
    metrics: Arc<MetricsCollector>,
    total_requests: AtomicU64,
    successful_matches: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latencies_us: Mutex<Vec<u64>>,
}

impl ServiceInner {
    fn caching_enabled(&self) -> bool {
        self.config.caching_enabled && self.config.cache_capacity > 0
    }

    fn record_request_latency(&self, elapsed_us: u64) {
        self.latencies_us
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(elapsed_us);
    }

    /// The whole request pipeline. Every exit path records latency and
    /// returns a response; errors never escape as `Err`.
    fn process(&self, request: MatchRequest) -> MatchResponse {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let timer = self.metrics.start_timer("match_total");

        let key = cache_key(&request.fingerprint);
        if self.caching_enabled() {
            let cached = {
                let mut cache = self
                    .cache
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                cache.get(&key)
            };
            if let Some(matches) = cached {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment_counter("match_cached");
                let elapsed_us = timer.elapsed_us();
                self.metrics.record_latency("match_cached", elapsed_us);
                self.record_request_latency(elapsed_us);
                tracing::debug!(request_id = %request.request_id, "served from cache");
                return MatchResponse {
                    request_id: request.request_id,
                    matches,
                    processing_time_us: elapsed_us,
                    success: true,
                    error: None,
                };
            }
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let min_similarity = request
            .min_similarity
            .unwrap_or(self.config.default_min_similarity)
            .clamp(0.0, 1.0);
        let max_results = request.max_results.unwrap_or(self.config.default_max_results);

        let lookup = {
            let _db_timer = self.metrics.start_timer("match_db_query");
            self.store
                .find_matches(&request.fingerprint, min_similarity, max_results)
        };

        let elapsed_us = timer.elapsed_us();
        self.record_request_latency(elapsed_us);

        match lookup {
            Ok(matches) => {
                self.successful_matches.fetch_add(1, Ordering::Relaxed);
                if self.caching_enabled() && !matches.is_empty() {
                    let mut cache = self
                        .cache
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    cache.put(key, matches.clone());
                }
                MatchResponse {
                    request_id: request.request_id,
                    matches,
                    processing_time_us: elapsed_us,
                    success: true,
                    error: None,
                }
            }
            Err(err) => {
                self.metrics.increment_counter("match_errors");
                tracing::warn!(request_id = %request.request_id, error = %err, "match failed");
                MatchResponse::failure(request.request_id, elapsed_us, err.to_string())
            }
        }
    }
}

/// Concurrent fingerprint matcher.
pub struct MatcherService {
    inner: Arc<ServiceInner>,
    pool: ThreadPool,
}

impl MatcherService {
    /// Build a service over `store`. The configuration is validated first;
    /// construction fails rather than running with a zero-worker pool or an
    /// out-of-range default threshold.
    pub fn new(config: MatcherConfig, store: Arc<dyn FingerprintStore>) -> Result<Self, MatchError> {
        config.validate()?;
        let pool = ThreadPool::new(config.worker_count)?;
        let cache = ResultCache::new(if config.caching_enabled {
            config.cache_capacity
        } else {
            0
        });

        tracing::info!(
            workers = config.worker_count,
            cache_capacity = cache.capacity(),
            "matcher service started"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                store,
                generator: FingerprintGenerator::new(),
                cache: Mutex::new(cache),
                metrics: Arc::new(MetricsCollector::new()),
                total_requests: AtomicU64::new(0),
                successful_matches: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                latencies_us: Mutex::new(Vec::new()),
            }),
            pool,
        })
    }

    /// Process a request on the calling thread.
    pub fn match_request(&self, request: MatchRequest) -> MatchResponse {
        self.inner.process(request)
    }

    /// Queue a request on the worker pool and return a handle to its
    /// eventual response.
    pub fn match_async(&self, request: MatchRequest) -> Result<TaskHandle<MatchResponse>, PoolError> {
        let inner = Arc::clone(&self.inner);
        self.pool.submit(move || inner.process(request))
    }

    /// Process a batch concurrently, preserving input order in the output.
    ///
    /// Each request succeeds or fails independently; a request that cannot be
    /// queued or whose task is lost yields a failure response in its slot.
    pub fn match_batch(&self, requests: Vec<MatchRequest>) -> Vec<MatchResponse> {
        let submissions: Vec<(String, Result<TaskHandle<MatchResponse>, PoolError>)> = requests
            .into_iter()
            .map(|request| (request.request_id.clone(), self.match_async(request)))
            .collect();

        submissions
            .into_iter()
            .map(|(request_id, submission)| match submission {
                Ok(handle) => handle
                    .wait()
                    .unwrap_or_else(|err| MatchResponse::failure(request_id, 0, err.to_string())),
                Err(err) => MatchResponse::failure(request_id, 0, err.to_string()),
            })
            .collect()
    }

    /// Fingerprint raw audio and register it in the store under `content_id`.
    /// Returns the metadata as stored, including the backend-assigned id.
    pub fn index_content(
        &self,
        content_id: &str,
        audio: &AudioBuffer,
        title: &str,
        source: &str,
    ) -> Result<ContentMetadata, MatchError> {
        let fingerprint = self.inner.generator.generate(audio);
        let metadata = ContentMetadata {
            id: 0,
            content_id: content_id.to_string(),
            title: title.to_string(),
            source: source.to_string(),
            duration_ms: fingerprint.duration_ms,
            created_at: Utc::now(),
        };
        self.inner
            .store
            .store_fingerprint(content_id, &fingerprint, &metadata)?;

        let stored = self
            .inner
            .store
            .get_content_by_id(content_id)?
            .ok_or_else(|| StoreError::Backend("stored content not found after insert".into()))?;
        tracing::info!(content_id, hashes = fingerprint.hashes.len(), "indexed content");
        Ok(stored)
    }

    /// Fingerprint raw audio without touching the store.
    pub fn fingerprint(&self, audio: &AudioBuffer) -> Fingerprint {
        self.inner.generator.generate(audio)
    }

    pub fn stats(&self) -> ServiceStats {
        let latencies = {
            let guard = self
                .inner
                .latencies_us
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut sorted = guard.clone();
            sorted.sort_unstable();
            sorted
        };
        let avg_latency_us = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        ServiceStats {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            successful_matches: self.inner.successful_matches.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            avg_latency_us,
            p95_latency_us: percentile(&latencies, 0.95),
            p99_latency_us: percentile(&latencies, 0.99),
        }
    }

    pub fn clear_cache(&self) {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.inner.config
    }

    /// Finish in-flight requests, discard queued ones, and stop the workers.
    /// Further `match_async` calls fail with [`PoolError::Stopped`].
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
        tracing::info!("matcher service stopped");
    }
}
