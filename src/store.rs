//! Persisted state
//!
//! `SketchStore` is the seam to the storage collaborator. It exposes the
//! tables the engine persists: grammars, processing batches, per-batch
//! frequency tables, running totals per grammar version, collocation
//! records, accessibility scores and analysis cache entries. A batch commit replaces everything that depends on the
//! batch in one step, so readers never observe a half-written batch.
//!
//! `MemoryStore` keeps all tables behind one lock. Lock acquisition is
//! bounded by a timeout, and the store can be switched unavailable to
//! exercise failure handling.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::accessibility::AccessibilityScore;
use crate::aggregator::FrequencyTables;
use crate::cache::AnalysisCacheEntry;
use crate::pattern::GrammarSet;
use crate::pipeline::{BatchId, ProcessingBatch};
use crate::scorer::CollocationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage lock not acquired within {0:?}")]
    Timeout(Duration),
}

/// Summed tables of every batch committed under one grammar version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTotals {
    /// Committed batch ids, ascending
    pub batches: Vec<BatchId>,
    pub tables: FrequencyTables,
}

/// Everything written when a batch completes
#[derive(Debug, Clone)]
pub struct BatchCommit {
    pub batch: ProcessingBatch,
    pub grammar_version: String,
    /// Frequency tables of this batch alone
    pub tables: FrequencyTables,
    /// Version totals with this batch included
    pub totals: VersionTotals,
    /// Full record set of the grammar version, rescored after this batch
    pub records: Vec<CollocationRecord>,
    /// Full accessibility table, recomputed after this batch
    pub accessibility: Vec<AccessibilityScore>,
}

pub trait SketchStore: Send + Sync {
    fn save_grammars(&self, set: &GrammarSet) -> Result<(), StoreError>;

    fn load_grammars(&self, version: &str) -> Result<Option<GrammarSet>, StoreError>;

    fn put_batch(&self, batch: &ProcessingBatch) -> Result<(), StoreError>;

    fn batch(&self, batch_id: BatchId) -> Result<Option<ProcessingBatch>, StoreError>;

    fn batches(&self) -> Result<Vec<ProcessingBatch>, StoreError>;

    /// Committed per-batch tables of a grammar version, ascending by batch id
    fn batch_tables(&self, version: &str) -> Result<Vec<(BatchId, FrequencyTables)>, StoreError>;

    fn version_totals(&self, version: &str) -> Result<Option<VersionTotals>, StoreError>;

    /// Atomically store a completed batch and its derived records
    fn commit_batch(&self, commit: BatchCommit) -> Result<(), StoreError>;

    /// Records of one headword under a grammar version, in no particular order
    fn records_for_headword(
        &self,
        version: &str,
        headword_lemma: &str,
    ) -> Result<Vec<CollocationRecord>, StoreError>;

    fn accessibility(&self, lemma: &str, pos: &str)
    -> Result<Option<AccessibilityScore>, StoreError>;

    fn save_cache_entries(
        &self,
        fingerprint: &str,
        entries: Vec<AnalysisCacheEntry>,
    ) -> Result<(), StoreError>;

    fn load_cache_entries(&self, fingerprint: &str) -> Result<Vec<AnalysisCacheEntry>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    grammars: BTreeMap<String, GrammarSet>,
    batches: BTreeMap<BatchId, ProcessingBatch>,
    batch_tables: BTreeMap<(String, BatchId), FrequencyTables>,
    totals: BTreeMap<String, VersionTotals>,
    /// version -> headword lemma -> records
    records: BTreeMap<String, BTreeMap<String, Vec<CollocationRecord>>>,
    accessibility: BTreeMap<(String, String), AccessibilityScore>,
    cache_entries: BTreeMap<String, Vec<AnalysisCacheEntry>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
    timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
            timeout,
        }
    }

    /// Simulate the storage backend going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.check_available()?;
        self.tables
            .try_read_for(self.timeout)
            .ok_or(StoreError::Timeout(self.timeout))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.check_available()?;
        self.tables
            .try_write_for(self.timeout)
            .ok_or(StoreError::Timeout(self.timeout))
    }
}

impl SketchStore for MemoryStore {
    fn save_grammars(&self, set: &GrammarSet) -> Result<(), StoreError> {
        self.write()?
            .grammars
            .insert(set.version.clone(), set.clone());
        Ok(())
    }

    fn load_grammars(&self, version: &str) -> Result<Option<GrammarSet>, StoreError> {
        Ok(self.read()?.grammars.get(version).cloned())
    }

    fn put_batch(&self, batch: &ProcessingBatch) -> Result<(), StoreError> {
        self.write()?.batches.insert(batch.batch_id, batch.clone());
        Ok(())
    }

    fn batch(&self, batch_id: BatchId) -> Result<Option<ProcessingBatch>, StoreError> {
        Ok(self.read()?.batches.get(&batch_id).cloned())
    }

    fn batches(&self) -> Result<Vec<ProcessingBatch>, StoreError> {
        Ok(self.read()?.batches.values().cloned().collect())
    }

    fn batch_tables(&self, version: &str) -> Result<Vec<(BatchId, FrequencyTables)>, StoreError> {
        Ok(self
            .read()?
            .batch_tables
            .iter()
            .filter(|((v, _), _)| v == version)
            .map(|((_, id), tables)| (*id, tables.clone()))
            .collect())
    }

    fn version_totals(&self, version: &str) -> Result<Option<VersionTotals>, StoreError> {
        Ok(self.read()?.totals.get(version).cloned())
    }

    fn commit_batch(&self, commit: BatchCommit) -> Result<(), StoreError> {
        let BatchCommit {
            batch,
            grammar_version,
            tables,
            totals,
            records,
            accessibility,
        } = commit;

        // build the replacement tables before taking the lock
        let mut by_headword: BTreeMap<String, Vec<CollocationRecord>> = BTreeMap::new();
        for record in records {
            by_headword
                .entry(record.headword_lemma.clone())
                .or_default()
                .push(record);
        }
        let accessibility: BTreeMap<_, _> = accessibility
            .into_iter()
            .map(|score| ((score.lemma.clone(), score.pos.clone()), score))
            .collect();

        let mut guard = self.write()?;
        debug!(
            batch_id = batch.batch_id,
            version = %grammar_version,
            headwords = by_headword.len(),
            "committing batch"
        );
        guard
            .batch_tables
            .insert((grammar_version.clone(), batch.batch_id), tables);
        guard.totals.insert(grammar_version.clone(), totals);
        guard.records.insert(grammar_version, by_headword);
        guard.accessibility = accessibility;
        guard.batches.insert(batch.batch_id, batch);
        Ok(())
    }

    fn records_for_headword(
        &self,
        version: &str,
        headword_lemma: &str,
    ) -> Result<Vec<CollocationRecord>, StoreError> {
        Ok(self
            .read()?
            .records
            .get(version)
            .and_then(|by_headword| by_headword.get(headword_lemma))
            .cloned()
            .unwrap_or_default())
    }

    fn accessibility(
        &self,
        lemma: &str,
        pos: &str,
    ) -> Result<Option<AccessibilityScore>, StoreError> {
        Ok(self
            .read()?
            .accessibility
            .get(&(lemma.to_string(), pos.to_string()))
            .cloned())
    }

    fn save_cache_entries(
        &self,
        fingerprint: &str,
        entries: Vec<AnalysisCacheEntry>,
    ) -> Result<(), StoreError> {
        self.write()?
            .cache_entries
            .insert(fingerprint.to_string(), entries);
        Ok(())
    }

    fn load_cache_entries(&self, fingerprint: &str) -> Result<Vec<AnalysisCacheEntry>, StoreError> {
        Ok(self
            .read()?
            .cache_entries
            .get(fingerprint)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::SketchGrammar;
    use crate::pipeline::BatchStatus;
    use crate::source::SentenceSelection;

    fn record(headword: &str, collocate: &str) -> CollocationRecord {
        CollocationRecord {
            headword_lemma: headword.to_string(),
            headword_pos: "NOUN".to_string(),
            collocate_lemma: collocate.to_string(),
            collocate_pos: "ADJ".to_string(),
            relation_name: "modifier".to_string(),
            frequency: 1,
            logdice_score: 13.0,
            mutual_information: 1.0,
            t_score: 0.5,
            example_sentence_ids: vec![1],
            grammar_version: "v1".to_string(),
        }
    }

    fn commit(batch_id: BatchId, records: Vec<CollocationRecord>) -> BatchCommit {
        let mut batch = ProcessingBatch::new(batch_id, SentenceSelection::All);
        batch.status = BatchStatus::Completed;
        BatchCommit {
            batch,
            grammar_version: "v1".to_string(),
            tables: FrequencyTables::new(5),
            totals: VersionTotals {
                batches: vec![batch_id],
                tables: FrequencyTables::new(5),
            },
            records,
            accessibility: Vec::new(),
        }
    }

    #[test]
    fn test_commit_replaces_version_records() {
        let store = MemoryStore::new();
        store
            .commit_batch(commit(1, vec![record("house", "big"), record("garden", "big")]))
            .unwrap();
        assert_eq!(store.records_for_headword("v1", "house").unwrap().len(), 1);

        store
            .commit_batch(commit(2, vec![record("house", "old")]))
            .unwrap();
        let house = store.records_for_headword("v1", "house").unwrap();
        assert_eq!(house.len(), 1);
        assert_eq!(house[0].collocate_lemma, "old");
        assert!(store.records_for_headword("v1", "garden").unwrap().is_empty());
        assert!(store.records_for_headword("v2", "house").unwrap().is_empty());

        let ids: Vec<_> = store
            .batch_tables("v1")
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.version_totals("v1").unwrap().unwrap().batches, vec![2]);
        assert_eq!(store.version_totals("v2").unwrap(), None);
        assert_eq!(store.batch(2).unwrap().unwrap().status, BatchStatus::Completed);
    }

    #[test]
    fn test_unavailable_store_rejects_everything() {
        let store = MemoryStore::new();
        store
            .commit_batch(commit(1, vec![record("house", "big")]))
            .unwrap();

        store.set_available(false);
        assert!(matches!(
            store.commit_batch(commit(2, vec![])),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.records_for_headword("v1", "house").is_err());

        store.set_available(true);
        assert_eq!(store.records_for_headword("v1", "house").unwrap().len(), 1);
        assert!(store.batch(2).unwrap().is_none());
    }

    #[test]
    fn test_lock_timeout() {
        let store = MemoryStore::with_timeout(Duration::from_millis(20));
        let _reader = store.tables.read();
        assert!(matches!(
            store.commit_batch(commit(1, vec![])),
            Err(StoreError::Timeout(_))
        ));
    }

    #[test]
    fn test_grammars_and_cache_entries() {
        let store = MemoryStore::new();
        let set = GrammarSet::new("v3", vec![SketchGrammar::new("m", "1:[] 2:[]", "en")]);
        store.save_grammars(&set).unwrap();
        assert_eq!(store.load_grammars("v3").unwrap(), Some(set));
        assert_eq!(store.load_grammars("v4").unwrap(), None);

        assert!(store.load_cache_entries("abc").unwrap().is_empty());
        store.save_cache_entries("abc", Vec::new()).unwrap();
        assert!(store.load_cache_entries("abc").unwrap().is_empty());
    }
}
