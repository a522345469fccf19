//! Content-addressed analysis cache
//!
//! Maps a sentence's content hash to the relation matches computed for it.
//! The key depends only on the tagged tokens, so concurrent writers of the
//! same key always write the same value and an evicted entry only costs a
//! recomputation. A cache instance belongs to one compiled grammar set.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::matcher::MatchResult;
use crate::sentence::ContentHash;

/// A match labeled with the relation that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMatch {
    pub relation: Arc<str>,
    pub matched: MatchResult,
}

/// Every relation match of one sentence, in grammar order
pub type Analysis = Arc<[RelationMatch]>;

/// Serializable form of a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCacheEntry {
    pub content_hash: ContentHash,
    pub matches: Vec<RelationMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct AnalysisCache {
    /// `None` when caching is disabled (capacity 0)
    entries: Option<Mutex<LruCache<ContentHash, Analysis>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<Analysis> {
        let found = self.entries.as_ref()?.lock().get(hash).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, hash: ContentHash, analysis: Analysis) {
        if let Some(entries) = &self.entries {
            entries.lock().put(hash, analysis);
        }
    }

    /// Return the cached analysis, computing and storing it on a miss
    ///
    /// The computation runs without holding the lock; two workers racing on
    /// the same key compute identical values, so the later write is harmless.
    pub fn get_or_compute(
        &self,
        hash: ContentHash,
        compute: impl FnOnce() -> Vec<RelationMatch>,
    ) -> Analysis {
        if let Some(analysis) = self.get(&hash) {
            return analysis;
        }
        if self.entries.is_none() {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        let analysis: Analysis = compute().into();
        self.insert(hash, analysis.clone());
        analysis
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of every entry, least recently used first
    pub fn export(&self) -> Vec<AnalysisCacheEntry> {
        let Some(entries) = &self.entries else {
            return Vec::new();
        };
        let entries = entries.lock();
        entries
            .iter()
            .rev()
            .map(|(hash, analysis)| AnalysisCacheEntry {
                content_hash: *hash,
                matches: analysis.to_vec(),
            })
            .collect()
    }

    /// Load entries produced by `export`, preserving their recency order
    pub fn warm(&self, entries: impl IntoIterator<Item = AnalysisCacheEntry>) {
        for entry in entries {
            self.insert(entry.content_hash, entry.matches.into());
        }
    }
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
