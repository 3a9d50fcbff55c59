//! Embeddable concurrent audio-fingerprint matching engine.
//!
//! # Purpose
//! Turns raw PCM audio into compact spectral fingerprints and matches query
//! fingerprints against a registered corpus through an indexed store, with a
//! bounded result cache, a fixed worker pool for parallel requests, and
//! per-instance metrics.
//!
//! # Core Types
//! - [`FingerprintGenerator`] / [`Fingerprint`]: deterministic spectral
//!   hashing of [`AudioBuffer`]s.
//! - [`FingerprintStore`] / [`MemoryStore`]: the persistence boundary and its
//!   in-memory reference backend.
//! - [`MatcherService`]: request orchestration over cache, store, pool, and
//!   metrics, configured by [`MatcherConfig`].
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use audiomatch::{MatchRequest, MatcherConfig, MatcherService, MemoryStore};
//!
//! # fn main() -> Result<(), audiomatch::MatchError> {
//! let store = Arc::new(MemoryStore::new());
//! let service = MatcherService::new(MatcherConfig::default(), store)?;
//!
//! let tone: Vec<f32> = (0..44_100)
//!     .map(|i| {
//!         let t = i as f32 / 44_100.0;
//!         (2.0 * std::f32::consts::PI * (440.0 + 100.0 * t) * t).sin()
//!     })
//!     .collect();
//! let audio = audiomatch::AudioBuffer {
//!     samples: tone,
//!     sample_rate: 44_100,
//!     channels: 1,
//! };
//! service.index_content("tone-440", &audio, "Reference Tone", "docs")?;
//!
//! let response = service.match_request(MatchRequest {
//!     request_id: "example".to_string(),
//!     fingerprint: service.fingerprint(&audio),
//!     min_similarity: Some(0.5),
//!     max_results: None,
//! });
//! assert!(response.success);
//! assert_eq!(response.matches[0].metadata.content_id, "tone-440");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod metrics;
pub mod pool;
pub mod ranking;
pub mod service;
pub mod store;

pub use cache::{cache_key, ResultCache, MAX_KEY_LEN};
pub use config::{ConfigError, MatcherConfig};
pub use fingerprint::{
    AudioBuffer, Fingerprint, FingerprintGenerator, FRAME_SIZE, HOP_SIZE, NUM_BANDS,
};
pub use metrics::{LatencyStats, LatencyTimer, MetricsCollector};
pub use pool::{PoolError, TaskHandle, ThreadPool};
pub use ranking::rank;
pub use service::{MatchError, MatchRequest, MatchResponse, MatcherService, ServiceStats};
pub use store::{
    ContentMetadata, FingerprintStore, HashVote, MatchResult, MemoryStore, StoreError,
    StoreStats, StoredFingerprint,
};
