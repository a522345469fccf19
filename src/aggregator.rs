//! Collocation aggregation
//!
//! Turns the relation matches of a batch of sentences into frequency tables.
//! Work is split into contiguous shards; every shard is counted into its own
//! `FrequencyTables` and the shard tables are merged once, in shard order,
//! so the result (example samples included) does not depend on how many
//! workers ran.

use rayon::ThreadPool;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{Analysis, AnalysisCache, RelationMatch};
use crate::compiler::CompiledGrammarSet;
use crate::matcher::find_matches;
use crate::sentence::{SentenceId, SkippedSentence, TaggedSentence, Token};

/// A `(lemma, pos)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LemmaPos {
    pub lemma: String,
    pub pos: String,
}

impl LemmaPos {
    pub fn new(lemma: &str, pos: &str) -> Self {
        Self {
            lemma: lemma.to_string(),
            pos: pos.to_string(),
        }
    }

    fn of(token: &Token) -> Self {
        Self::new(&token.lemma, &token.pos_tag)
    }
}

/// Key of the co-occurrence counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TripleKey {
    pub head: LemmaPos,
    pub collocate: LemmaPos,
    pub relation: Arc<str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripleCounts {
    pub frequency: u64,
    /// First-seen sentence ids, at most `example_limit` of them
    pub examples: Vec<SentenceId>,
}

/// Counters accumulated over a set of sentences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTables {
    pub example_limit: usize,
    /// Retained matches per headword
    pub headwords: FxHashMap<LemmaPos, u64>,
    /// Retained matches per collocate
    pub collocates: FxHashMap<LemmaPos, u64>,
    pub triples: FxHashMap<TripleKey, TripleCounts>,
    /// Occurrences of every token lemma in counted sentences
    pub lemmas: FxHashMap<LemmaPos, u64>,
    pub tokens: u64,
    pub sentences: u64,
    pub skipped: Vec<SkippedSentence>,
}

impl FrequencyTables {
    pub fn new(example_limit: usize) -> Self {
        Self {
            example_limit,
            headwords: FxHashMap::default(),
            collocates: FxHashMap::default(),
            triples: FxHashMap::default(),
            lemmas: FxHashMap::default(),
            tokens: 0,
            sentences: 0,
            skipped: Vec::new(),
        }
    }

    pub fn headword_total(&self, key: &LemmaPos) -> u64 {
        self.headwords.get(key).copied().unwrap_or(0)
    }

    pub fn collocate_total(&self, key: &LemmaPos) -> u64 {
        self.collocates.get(key).copied().unwrap_or(0)
    }

    pub fn lemma_frequency(&self, key: &LemmaPos) -> u64 {
        self.lemmas.get(key).copied().unwrap_or(0)
    }

    pub fn triple(&self, key: &TripleKey) -> Option<&TripleCounts> {
        self.triples.get(key)
    }

    fn count_match(
        &mut self,
        head: LemmaPos,
        collocate: LemmaPos,
        relation: &Arc<str>,
        id: SentenceId,
    ) {
        *self.headwords.entry(head.clone()).or_default() += 1;
        *self.collocates.entry(collocate.clone()).or_default() += 1;

        let limit = self.example_limit;
        let counts = self
            .triples
            .entry(TripleKey {
                head,
                collocate,
                relation: relation.clone(),
            })
            .or_default();
        counts.frequency += 1;
        if counts.examples.len() < limit && !counts.examples.contains(&id) {
            counts.examples.push(id);
        }
    }

    fn count_tokens(&mut self, tokens: &[Token]) {
        for token in tokens {
            *self.lemmas.entry(LemmaPos::of(token)).or_default() += 1;
        }
        self.tokens += tokens.len() as u64;
        self.sentences += 1;
    }

    /// Add `other` into `self`; `other` must cover later sentences so that
    /// example samples stay first-seen
    pub fn absorb(&mut self, other: FrequencyTables) {
        for (key, n) in other.headwords {
            *self.headwords.entry(key).or_default() += n;
        }
        for (key, n) in other.collocates {
            *self.collocates.entry(key).or_default() += n;
        }
        for (key, n) in other.lemmas {
            *self.lemmas.entry(key).or_default() += n;
        }

        let limit = self.example_limit;
        for (key, theirs) in other.triples {
            let ours = self.triples.entry(key).or_default();
            ours.frequency += theirs.frequency;
            for id in theirs.examples {
                if ours.examples.len() >= limit {
                    break;
                }
                if !ours.examples.contains(&id) {
                    ours.examples.push(id);
                }
            }
        }

        self.tokens += other.tokens;
        self.sentences += other.sentences;
        self.skipped.extend(other.skipped);
    }

    /// Add sentences rejected before counting; the skipped list stays
    /// ordered by sentence id
    pub fn add_skipped(&mut self, skipped: impl IntoIterator<Item = SkippedSentence>) {
        self.skipped.extend(skipped);
        self.skipped.sort_by_key(|s| s.sentence_id);
    }

    /// Sum tables in order
    pub fn sum<'a>(
        example_limit: usize,
        tables: impl IntoIterator<Item = &'a FrequencyTables>,
    ) -> FrequencyTables {
        let mut total = FrequencyTables::new(example_limit);
        for t in tables {
            total.absorb(t.clone());
        }
        total
    }
}

/// Cooperative cancellation flag, checked between sentences
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("aggregation cancelled")]
pub struct Cancelled;

/// Counts relation matches with one compiled grammar set
pub struct Aggregator {
    grammars: Arc<CompiledGrammarSet>,
    cache: Arc<AnalysisCache>,
    bidirectional: FxHashSet<Arc<str>>,
    example_limit: usize,
}

impl Aggregator {
    pub fn new(
        grammars: Arc<CompiledGrammarSet>,
        cache: Arc<AnalysisCache>,
        example_limit: usize,
    ) -> Self {
        let bidirectional = grammars
            .active()
            .filter(|g| g.bidirectional)
            .map(|g| g.name.clone())
            .collect();
        Self {
            grammars,
            cache,
            bidirectional,
            example_limit,
        }
    }

    /// Matches of every active grammar, served from the cache when possible
    pub fn analyze(&self, sentence: &TaggedSentence) -> Analysis {
        self.cache.get_or_compute(sentence.content_hash, || {
            let mut matches = Vec::new();
            for grammar in self.grammars.active() {
                matches.extend(
                    find_matches(&grammar.pattern, sentence)
                        .into_iter()
                        .map(|matched| RelationMatch {
                            relation: grammar.name.clone(),
                            matched,
                        }),
                );
            }
            matches
        })
    }

    /// Count one shard of sentences
    pub fn aggregate(
        &self,
        sentences: &[TaggedSentence],
        cancel: &CancelToken,
    ) -> Result<FrequencyTables, Cancelled> {
        let mut tables = FrequencyTables::new(self.example_limit);

        for sentence in sentences {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if let Err(reason) = sentence.validate() {
                warn!(sentence_id = sentence.sentence_id, "skipping sentence: {}", reason);
                tables.skipped.push(SkippedSentence {
                    sentence_id: sentence.sentence_id,
                    reason,
                });
                continue;
            }

            tables.count_tokens(&sentence.tokens);
            for m in self.analyze(sentence).iter() {
                let head = LemmaPos::of(&sentence.tokens[m.matched.head]);
                let collocate = LemmaPos::of(&sentence.tokens[m.matched.collocate]);
                if self.bidirectional.contains(&m.relation) {
                    tables.count_match(
                        collocate.clone(),
                        head.clone(),
                        &m.relation,
                        sentence.sentence_id,
                    );
                }
                tables.count_match(head, collocate, &m.relation, sentence.sentence_id);
            }
        }

        Ok(tables)
    }

    /// Count a batch on `pool`, `shard_size` sentences per task
    pub fn aggregate_parallel(
        &self,
        sentences: &[TaggedSentence],
        shard_size: usize,
        pool: &ThreadPool,
        cancel: &CancelToken,
    ) -> Result<FrequencyTables, Cancelled> {
        let shard_size = shard_size.max(1);
        let shards = pool.install(|| {
            sentences
                .par_chunks(shard_size)
                .map(|shard| self.aggregate(shard, cancel))
                .collect::<Result<Vec<_>, _>>()
        })?;
        debug!(shards = shards.len(), sentences = sentences.len(), "merging shard tables");

        let mut total = FrequencyTables::new(self.example_limit);
        for shard in shards {
            total.absorb(shard);
        }
        Ok(total)
    }
}
