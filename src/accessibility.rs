//! Psychological accessibility
//!
//! Combines a lemma's corpus frequency with external psycholinguistic norms
//! (frequency per million words and, optionally, contextual diversity).
//! Lemmas the norms do not cover get a corpus-only score.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::aggregator::FrequencyTables;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormRecord {
    pub frequency_per_million: f64,
    pub context_diversity: Option<f64>,
}

/// External frequency norms
pub trait NormLookup: Send + Sync {
    fn lookup(&self, lemma: &str, pos: &str) -> Option<NormRecord>;
}

/// Norm source that knows no lemma
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNorms;

impl NormLookup for NoNorms {
    fn lookup(&self, _lemma: &str, _pos: &str) -> Option<NormRecord> {
        None
    }
}

#[derive(Debug, Error)]
pub enum NormError {
    #[error("failed to read norms from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("line {line_num}: {message}")]
    Line { line_num: usize, message: String },
}

/// Norms keyed by `(lemma, pos)`
#[derive(Debug, Clone, Default)]
pub struct NormTable {
    records: FxHashMap<(String, String), NormRecord>,
}

impl NormTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lemma: &str, pos: &str, record: NormRecord) {
        self.records
            .insert((lemma.to_string(), pos.to_string()), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_tsv_file(path: &Path) -> Result<Self, NormError> {
        let file = File::open(path).map_err(|source| NormError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            NormError::Io { source, .. } => NormError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Read `lemma<TAB>pos<TAB>fpm[<TAB>diversity]` lines; blank lines and
    /// lines starting with `#` are ignored
    pub fn from_reader(reader: impl BufRead) -> Result<Self, NormError> {
        let mut table = Self::new();
        for (index, line) in reader.lines().enumerate() {
            let line_num = index + 1;
            let line = line.map_err(|source| NormError::Io {
                path: PathBuf::new(),
                source,
            })?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if !(3..=4).contains(&fields.len()) {
                return Err(NormError::Line {
                    line_num,
                    message: format!("expected 3 or 4 tab-separated fields, got {}", fields.len()),
                });
            }
            let number = |s: &str, what: &str| {
                s.trim().parse::<f64>().map_err(|_| NormError::Line {
                    line_num,
                    message: format!("invalid {}: {:?}", what, s),
                })
            };
            let record = NormRecord {
                frequency_per_million: number(fields[2], "frequency")?,
                context_diversity: match fields.get(3) {
                    Some(s) if !s.trim().is_empty() => Some(number(s.trim(), "diversity")?),
                    _ => None,
                },
            };
            table.insert(fields[0], fields[1], record);
        }
        Ok(table)
    }
}

impl NormLookup for NormTable {
    fn lookup(&self, lemma: &str, pos: &str) -> Option<NormRecord> {
        self.records
            .get(&(lemma.to_string(), pos.to_string()))
            .copied()
    }
}

/// Weighting of the composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilityWeights {
    pub corpus_weight: f64,
    pub norm_weight: f64,
    pub diversity_weight: f64,
    /// Multiplier bringing diversity values onto the log-frequency scale
    pub diversity_scale: f64,
}

impl Default for AccessibilityWeights {
    fn default() -> Self {
        Self {
            corpus_weight: 1.0,
            norm_weight: 1.0,
            diversity_weight: 0.5,
            diversity_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityScore {
    pub lemma: String,
    pub pos: String,
    pub corpus_frequency: u64,
    pub external_frequency_norm: Option<f64>,
    pub context_diversity: Option<f64>,
    pub accessibility_score: f64,
    /// No external norm was available
    pub corpus_only: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AccessibilityMerger {
    pub weights: AccessibilityWeights,
    pub corpus_tokens: u64,
}

impl AccessibilityMerger {
    pub fn new(weights: AccessibilityWeights, corpus_tokens: u64) -> Self {
        Self {
            weights,
            corpus_tokens,
        }
    }

    /// Corpus frequency per million, log-scaled
    fn corpus_component(&self, corpus_frequency: u64) -> f64 {
        if self.corpus_tokens == 0 {
            return 0.0;
        }
        let fpm = corpus_frequency as f64 * 1e6 / self.corpus_tokens as f64;
        (1.0 + fpm).log10()
    }

    pub fn merge(
        &self,
        lemma: &str,
        pos: &str,
        corpus_frequency: u64,
        norms: &dyn NormLookup,
    ) -> AccessibilityScore {
        let corpus = self.corpus_component(corpus_frequency);
        let norm = norms.lookup(lemma, pos);

        let (score, corpus_only) = match norm {
            None => (corpus, true),
            Some(record) => {
                let w = &self.weights;
                let external = (1.0 + record.frequency_per_million.max(0.0)).log10();
                let mut total = w.corpus_weight * corpus + w.norm_weight * external;
                let mut weight = w.corpus_weight + w.norm_weight;
                if let Some(diversity) = record.context_diversity {
                    total += w.diversity_weight * w.diversity_scale * diversity;
                    weight += w.diversity_weight;
                }
                if weight > 0.0 {
                    (total / weight, false)
                } else {
                    (corpus, false)
                }
            }
        };

        AccessibilityScore {
            lemma: lemma.to_string(),
            pos: pos.to_string(),
            corpus_frequency,
            external_frequency_norm: norm.map(|n| n.frequency_per_million),
            context_diversity: norm.and_then(|n| n.context_diversity),
            accessibility_score: score,
            corpus_only,
        }
    }

    /// Scores for every lemma counted in `tables`, sorted by `(lemma, pos)`
    pub fn merge_tables(
        &self,
        tables: &FrequencyTables,
        norms: &dyn NormLookup,
    ) -> Vec<AccessibilityScore> {
        let mut lemmas: Vec<_> = tables.lemmas.iter().collect();
        lemmas.sort();
        lemmas
            .into_iter()
            .map(|(key, &frequency)| self.merge(&key.lemma, &key.pos, frequency, norms))
            .collect()
    }
}
