//! Batch pipeline
//!
//! A `ProcessingBatch` moves `Pending -> Running -> Completed | Failed`.
//! Running a batch fetches its sentences, aggregates them on the worker
//! pool and commits the result to the store in one step. Anything that goes
//! wrong before that commit (source timeout, cancellation, storage failure)
//! fails the batch and leaves every committed count untouched.
//!
//! The compiled grammar set is fixed while batches run; reloading is
//! rejected until they finish.
//!
//! A batch found `Running` when a pipeline starts belonged to a process that
//! stopped mid-run. It is marked failed so it can be requeued.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::accessibility::{AccessibilityMerger, AccessibilityScore, NormLookup};
use crate::aggregator::{Aggregator, FrequencyTables};
use crate::cache::{AnalysisCache, CacheStats};
use crate::compiler::{CompileError, CompiledGrammarSet, compile_set};
use crate::config::EngineConfig;
use crate::pattern::GrammarSet;
use crate::query::{SketchQuery, get_sketch};
use crate::scorer::{CollocationRecord, score_tables};
use crate::sentence::SentenceId;
use crate::source::{FetchedSentences, SentenceSelection, SentenceSource};
use crate::store::{BatchCommit, SketchStore, StoreError, VersionTotals};
use crate::tagset::Tagsets;

pub use crate::aggregator::CancelToken;

pub type BatchId = u64;

/// Summary recorded for cancelled batches
pub const CANCELLED: &str = "cancelled";

/// Summary recorded for batches left running by an earlier process
pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Skipped sentences and, for failed batches, the failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub skipped: usize,
    pub skipped_ids: Vec<SentenceId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingBatch {
    pub batch_id: BatchId,
    pub selection: SentenceSelection,
    pub status: BatchStatus,
    pub grammar_version: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_summary: Option<ErrorSummary>,
}

impl ProcessingBatch {
    pub fn new(batch_id: BatchId, selection: SentenceSelection) -> Self {
        Self {
            batch_id,
            selection,
            status: BatchStatus::Pending,
            grammar_version: None,
            started_at: None,
            completed_at: None,
            error_summary: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),

    #[error("unknown batch {0}")]
    UnknownBatch(BatchId),

    #[error("no stored grammar set with version {0}")]
    UnknownVersion(String),

    #[error("batch {batch_id} is {status}")]
    InvalidTransition {
        batch_id: BatchId,
        status: BatchStatus,
    },

    #[error("cannot reload grammars while {running} batch(es) are running")]
    ReloadWhileRunning { running: usize },
}

/// Grammar set and the cache bound to it
struct Active {
    grammars: Arc<CompiledGrammarSet>,
    cache: Arc<AnalysisCache>,
}

/// Decrements the running-batch count when a run ends
struct RunGuard<'a>(&'a AtomicUsize);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Pipeline {
    config: EngineConfig,
    tagsets: Tagsets,
    active: RwLock<Active>,
    store: Arc<dyn SketchStore>,
    norms: Arc<dyn NormLookup>,
    pool: ThreadPool,
    batches: RwLock<BTreeMap<BatchId, ProcessingBatch>>,
    running: AtomicUsize,
    commit_lock: Mutex<()>,
    next_batch: AtomicU64,
}

impl Pipeline {
    /// Compile `grammars` and prepare the worker pool; batches already in
    /// the store keep their ids
    pub fn new(
        config: EngineConfig,
        grammars: &GrammarSet,
        store: Arc<dyn SketchStore>,
        norms: Arc<dyn NormLookup>,
    ) -> Result<Self, PipelineError> {
        let tagsets = config.tagsets();
        let compiled = Arc::new(compile_set(grammars, &tagsets)?);
        store.save_grammars(grammars)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("wordsketch-{}", i))
            .build()?;

        let known = store.batches()?;
        let next_batch = known.iter().map(|b| b.batch_id).max().unwrap_or(0) + 1;
        let mut interrupted = Vec::new();
        let mut batches = BTreeMap::new();
        for mut batch in known {
            if batch.status == BatchStatus::Running {
                warn!(batch_id = batch.batch_id, "batch was interrupted");
                batch.status = BatchStatus::Failed;
                batch.completed_at = Some(Utc::now());
                batch.error_summary = Some(ErrorSummary {
                    error: Some(INTERRUPTED.to_string()),
                    ..ErrorSummary::default()
                });
                interrupted.push(batch.clone());
            }
            batches.insert(batch.batch_id, batch);
        }

        let cache = new_cache(&config, &compiled, store.as_ref());
        info!(
            version = %compiled.version,
            grammars = compiled.grammars.len(),
            workers = pool.current_num_threads(),
            "pipeline ready"
        );

        let pipeline = Self {
            config,
            tagsets,
            active: RwLock::new(Active {
                grammars: compiled,
                cache,
            }),
            store,
            norms,
            pool,
            batches: RwLock::new(batches),
            running: AtomicUsize::new(0),
            commit_lock: Mutex::new(()),
            next_batch: AtomicU64::new(next_batch),
        };
        for batch in &interrupted {
            pipeline.mirror(batch);
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn grammar_version(&self) -> String {
        self.active.read().grammars.version.clone()
    }

    pub fn grammars(&self) -> Arc<CompiledGrammarSet> {
        self.active.read().grammars.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.active.read().cache.stats()
    }

    pub fn create_batch(&self, selection: SentenceSelection) -> ProcessingBatch {
        let batch_id = self.next_batch.fetch_add(1, Ordering::SeqCst);
        let batch = ProcessingBatch::new(batch_id, selection);
        self.batches.write().insert(batch_id, batch.clone());
        self.mirror(&batch);
        batch
    }

    pub fn batch(&self, batch_id: BatchId) -> Option<ProcessingBatch> {
        self.batches.read().get(&batch_id).cloned()
    }

    pub fn batches(&self) -> Vec<ProcessingBatch> {
        self.batches.read().values().cloned().collect()
    }

    /// Return a finished batch to `Pending` so it can run again
    pub fn requeue_batch(&self, batch_id: BatchId) -> Result<ProcessingBatch, PipelineError> {
        let batch = {
            let mut batches = self.batches.write();
            let batch = batches
                .get_mut(&batch_id)
                .ok_or(PipelineError::UnknownBatch(batch_id))?;
            match batch.status {
                BatchStatus::Completed | BatchStatus::Failed => {}
                status => return Err(PipelineError::InvalidTransition { batch_id, status }),
            }
            *batch = ProcessingBatch::new(batch_id, batch.selection.clone());
            batch.clone()
        };
        self.mirror(&batch);
        Ok(batch)
    }

    /// Run a pending batch to completion or failure
    ///
    /// Batch-level failures are reported through the returned batch's
    /// status; `Err` means the batch could not be started.
    pub fn run_batch(
        &self,
        batch_id: BatchId,
        source: &dyn SentenceSource,
        cancel: &CancelToken,
    ) -> Result<ProcessingBatch, PipelineError> {
        let (grammars, cache, _guard) = {
            let active = self.active.read();
            self.running.fetch_add(1, Ordering::SeqCst);
            (
                active.grammars.clone(),
                active.cache.clone(),
                RunGuard(&self.running),
            )
        };

        let batch = {
            let mut batches = self.batches.write();
            let batch = batches
                .get_mut(&batch_id)
                .ok_or(PipelineError::UnknownBatch(batch_id))?;
            if batch.status != BatchStatus::Pending {
                return Err(PipelineError::InvalidTransition {
                    batch_id,
                    status: batch.status,
                });
            }
            batch.status = BatchStatus::Running;
            batch.grammar_version = Some(grammars.version.clone());
            batch.started_at = Some(Utc::now());
            batch.clone()
        };
        self.mirror(&batch);
        info!(batch_id, version = %grammars.version, "batch started");

        let FetchedSentences {
            sentences,
            rejected,
        } = match source.fetch(&batch.selection, self.config.source_timeout()) {
            Ok(fetched) => fetched,
            Err(e) => return Ok(self.fail(batch, None, e.to_string())),
        };
        debug!(
            batch_id,
            sentences = sentences.len(),
            rejected = rejected.len(),
            "sentences fetched"
        );

        let aggregator = Aggregator::new(
            grammars.clone(),
            cache,
            self.config.example_sample_size,
        );
        let mut tables = match aggregator.aggregate_parallel(
            &sentences,
            self.config.shard_size,
            &self.pool,
            cancel,
        ) {
            Ok(tables) => tables,
            Err(_) => return Ok(self.fail(batch, None, CANCELLED.to_string())),
        };
        tables.add_skipped(rejected);

        self.commit(batch, &grammars.version, tables, cancel)
    }

    /// Rescore the version with this batch's tables and store the result
    fn commit(
        &self,
        mut batch: ProcessingBatch,
        version: &str,
        tables: FrequencyTables,
        cancel: &CancelToken,
    ) -> Result<ProcessingBatch, PipelineError> {
        let summary = skip_summary(&tables);
        let _commit = self.commit_lock.lock();

        if cancel.is_cancelled() {
            return Ok(self.fail(batch, summary, CANCELLED.to_string()));
        }

        let totals = match self.totals_with(version, batch.batch_id, &tables) {
            Ok(totals) => totals,
            Err(e) => return Ok(self.fail(batch, summary, e.to_string())),
        };
        let cumulative = &totals.tables;

        let records = score_tables(cumulative, version);
        let accessibility = AccessibilityMerger::new(self.config.accessibility, cumulative.tokens)
            .merge_tables(cumulative, self.norms.as_ref());

        batch.status = BatchStatus::Completed;
        batch.completed_at = Some(Utc::now());
        batch.error_summary = summary;

        let record_count = records.len();
        let commit = BatchCommit {
            batch: batch.clone(),
            grammar_version: version.to_string(),
            tables,
            totals,
            records,
            accessibility,
        };
        if let Err(e) = self.store.commit_batch(commit) {
            let summary = batch.error_summary.take();
            return Ok(self.fail(batch, summary, e.to_string()));
        }

        self.batches.write().insert(batch.batch_id, batch.clone());
        info!(
            batch_id = batch.batch_id,
            records = record_count,
            skipped = batch.error_summary.as_ref().map_or(0, |s| s.skipped),
            "batch completed"
        );
        Ok(batch)
    }

    /// Version totals once `tables` is committed as batch `batch_id`
    ///
    /// A batch newer than every committed one is added to the stored
    /// totals. A rerun, or a batch committed out of order, re-sums the
    /// per-batch tables in batch order so its earlier contribution is
    /// replaced and example samples stay first-seen.
    fn totals_with(
        &self,
        version: &str,
        batch_id: BatchId,
        tables: &FrequencyTables,
    ) -> Result<VersionTotals, StoreError> {
        let limit = self.config.example_sample_size;
        let stored = self.store.version_totals(version)?;
        let mut totals = match stored {
            Some(mut totals) if totals.batches.last().is_none_or(|last| *last < batch_id) => {
                totals.tables.absorb(tables.clone());
                totals.batches.push(batch_id);
                totals
            }
            None => VersionTotals {
                batches: vec![batch_id],
                tables: FrequencyTables::sum(limit, [tables]),
            },
            Some(_) => {
                debug!(batch_id, version, "re-summing version totals");
                let mut committed = self.store.batch_tables(version)?;
                committed.retain(|(id, _)| *id != batch_id);
                let at = committed.partition_point(|(id, _)| *id < batch_id);
                committed.insert(at, (batch_id, tables.clone()));
                VersionTotals {
                    batches: committed.iter().map(|(id, _)| *id).collect(),
                    tables: FrequencyTables::sum(limit, committed.iter().map(|(_, t)| t)),
                }
            }
        };
        // skipped sentences are reported per batch
        totals.tables.skipped.clear();
        Ok(totals)
    }

    fn fail(
        &self,
        mut batch: ProcessingBatch,
        summary: Option<ErrorSummary>,
        error: String,
    ) -> ProcessingBatch {
        warn!(batch_id = batch.batch_id, "batch failed: {}", error);
        let mut summary = summary.unwrap_or_default();
        summary.error = Some(error);
        batch.status = BatchStatus::Failed;
        batch.completed_at = Some(Utc::now());
        batch.error_summary = Some(summary);

        self.batches.write().insert(batch.batch_id, batch.clone());
        self.mirror(&batch);
        batch
    }

    /// Best-effort copy of batch bookkeeping to the store
    fn mirror(&self, batch: &ProcessingBatch) {
        if let Err(e) = self.store.put_batch(batch) {
            warn!(batch_id = batch.batch_id, "could not persist batch state: {}", e);
        }
    }

    /// Replace the grammar set; rejected while any batch is running
    pub fn reload_grammars(&self, set: &GrammarSet) -> Result<(), PipelineError> {
        let compiled = Arc::new(compile_set(set, &self.tagsets)?);

        let mut active = self.active.write();
        let running = self.running.load(Ordering::SeqCst);
        if running > 0 {
            return Err(PipelineError::ReloadWhileRunning { running });
        }
        self.store.save_grammars(set)?;
        active.cache = new_cache(&self.config, &compiled, self.store.as_ref());
        info!(version = %compiled.version, "grammars reloaded");
        active.grammars = compiled;
        Ok(())
    }

    /// Make a previously stored grammar version current again
    pub fn activate_version(&self, version: &str) -> Result<(), PipelineError> {
        let set = self
            .store
            .load_grammars(version)?
            .ok_or_else(|| PipelineError::UnknownVersion(version.to_string()))?;
        self.reload_grammars(&set)
    }

    /// Ranked sketch under the current grammar version
    pub fn get_sketch(&self, query: &SketchQuery) -> Result<Vec<CollocationRecord>, PipelineError> {
        let version = self.grammar_version();
        Ok(get_sketch(self.store.as_ref(), &version, query)?)
    }

    pub fn accessibility(
        &self,
        lemma: &str,
        pos: &str,
    ) -> Result<Option<AccessibilityScore>, PipelineError> {
        Ok(self.store.accessibility(lemma, pos)?)
    }

    /// Save the analysis cache for a later warm start; returns the entry count
    pub fn persist_cache(&self) -> Result<usize, PipelineError> {
        let (fingerprint, entries) = {
            let active = self.active.read();
            (active.grammars.fingerprint.clone(), active.cache.export())
        };
        let count = entries.len();
        self.store.save_cache_entries(&fingerprint, entries)?;
        debug!(entries = count, "analysis cache persisted");
        Ok(count)
    }
}

fn new_cache(
    config: &EngineConfig,
    grammars: &CompiledGrammarSet,
    store: &dyn SketchStore,
) -> Arc<AnalysisCache> {
    let cache = AnalysisCache::new(config.cache_capacity);
    match store.load_cache_entries(&grammars.fingerprint) {
        Ok(entries) if !entries.is_empty() => {
            debug!(entries = entries.len(), "warming analysis cache");
            cache.warm(entries);
        }
        Ok(_) => {}
        Err(e) => warn!("starting with a cold analysis cache: {}", e),
    }
    Arc::new(cache)
}

fn skip_summary(tables: &FrequencyTables) -> Option<ErrorSummary> {
    if tables.skipped.is_empty() {
        return None;
    }
    Some(ErrorSummary {
        skipped: tables.skipped.len(),
        skipped_ids: tables.skipped.iter().map(|s| s.sentence_id).collect(),
        error: None,
    })
}
