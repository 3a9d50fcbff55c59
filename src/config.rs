//! Matcher service configuration.
//!
//! Configuration deserializes from YAML with serde; every field has a default
//! so an empty document (or `MatcherConfig::default()`) yields a working
//! setup. Validation happens explicitly via [`MatcherConfig::validate`] and
//! again when a service is constructed, so a hand-built config cannot smuggle
//! in a zero-worker pool or an out-of-range threshold.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse config YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for a matcher service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatcherConfig {
    /// Worker threads in the service's pool. Must be at least 1.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Maximum entries in the result cache. 0 disables caching outright.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Master switch for the result cache; overrides `cache_capacity`.
    #[serde(default = "default_caching_enabled")]
    pub caching_enabled: bool,
    /// Similarity threshold applied when a request does not carry its own.
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f64,
    /// Result-list cap applied when a request does not carry its own.
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
}

fn default_worker_count() -> usize {
    8
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_caching_enabled() -> bool {
    true
}

fn default_min_similarity() -> f64 {
    0.7
}

fn default_max_results() -> usize {
    10
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            cache_capacity: default_cache_capacity(),
            caching_enabled: default_caching_enabled(),
            default_min_similarity: default_min_similarity(),
            default_max_results: default_max_results(),
        }
    }
}

impl MatcherConfig {
    /// Parse a YAML document. Missing fields fall back to defaults; unknown
    /// fields are rejected to catch typos.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_min_similarity) {
            return Err(ConfigError::Invalid(format!(
                "default_min_similarity must be within [0.0, 1.0], got {}",
                self.default_min_similarity
            )));
        }
        Ok(())
    }
}
