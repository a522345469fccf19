//! Engine configuration
//!
//! Loaded from a JSON file. Every field has a default, so an empty object
//! (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::accessibility::AccessibilityWeights;
use crate::tagset::Tagsets;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Example sentence ids kept per collocation
    pub example_sample_size: usize,
    /// Analysis cache entries; 0 disables the cache
    pub cache_capacity: usize,
    /// Worker threads; 0 uses one per CPU
    pub workers: usize,
    /// Sentences per worker task
    pub shard_size: usize,
    pub source_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub accessibility: AccessibilityWeights,
    /// Language-specific POS tags accepted besides the universal set
    pub tagsets: BTreeMap<String, Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            example_sample_size: 5,
            cache_capacity: 100_000,
            workers: 0,
            shard_size: 1024,
            source_timeout_ms: 60_000,
            store_timeout_ms: 5_000,
            accessibility: AccessibilityWeights::default(),
            tagsets: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn tagsets(&self) -> Tagsets {
        Tagsets::from_config(&self.tagsets)
    }
}
