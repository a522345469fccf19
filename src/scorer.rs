//! Association scores
//!
//! All scores are computed from three counts: the co-occurrence frequency of
//! a headword/collocate pair in one relation and the two marginal totals.
//! Zero denominators resolve to a score of 0.0, never to NaN or infinity.

use serde::{Deserialize, Serialize};

use crate::aggregator::{FrequencyTables, TripleKey};
use crate::sentence::SentenceId;

/// Upper end of the logDice scale
pub const LOG_DICE_MAX: f64 = 14.0;

/// `14 + log2(2·fxy / (fx + fy))`, floored at 0
pub fn log_dice(fxy: u64, fx: u64, fy: u64) -> f64 {
    let denominator = fx + fy;
    if denominator == 0 || fxy == 0 {
        return 0.0;
    }
    let score = LOG_DICE_MAX + (2.0 * fxy as f64 / denominator as f64).log2();
    score.max(0.0)
}

/// Pointwise mutual information over a corpus of `n` tokens
pub fn mutual_information(fxy: u64, fx: u64, fy: u64, n: u64) -> f64 {
    if fxy == 0 || fx == 0 || fy == 0 || n == 0 {
        return 0.0;
    }
    (fxy as f64 * n as f64 / (fx as f64 * fy as f64)).log2()
}

pub fn t_score(fxy: u64, fx: u64, fy: u64, n: u64) -> f64 {
    if fxy == 0 || n == 0 {
        return 0.0;
    }
    let expected = fx as f64 * fy as f64 / n as f64;
    (fxy as f64 - expected) / (fxy as f64).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssociationScores {
    pub log_dice: f64,
    pub mutual_information: f64,
    pub t_score: f64,
}

/// Scores pairs against a corpus of fixed size
#[derive(Debug, Clone, Copy)]
pub struct AssociationScorer {
    pub corpus_tokens: u64,
}

impl AssociationScorer {
    pub fn new(corpus_tokens: u64) -> Self {
        Self { corpus_tokens }
    }

    pub fn score(&self, fxy: u64, fx: u64, fy: u64) -> AssociationScores {
        AssociationScores {
            log_dice: log_dice(fxy, fx, fy),
            mutual_information: mutual_information(fxy, fx, fy, self.corpus_tokens),
            t_score: t_score(fxy, fx, fy, self.corpus_tokens),
        }
    }
}

/// One word sketch entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollocationRecord {
    pub headword_lemma: String,
    pub headword_pos: String,
    pub collocate_lemma: String,
    pub collocate_pos: String,
    pub relation_name: String,
    pub frequency: u64,
    pub logdice_score: f64,
    pub mutual_information: f64,
    pub t_score: f64,
    pub example_sentence_ids: Vec<SentenceId>,
    pub grammar_version: String,
}

impl CollocationRecord {
    /// `(headword, pos, relation, collocate, pos)` identity of the record
    pub fn key(&self) -> (&str, &str, &str, &str, &str) {
        (
            &self.headword_lemma,
            &self.headword_pos,
            &self.relation_name,
            &self.collocate_lemma,
            &self.collocate_pos,
        )
    }
}

/// Score every triple of `tables`; one record per key, sorted by key
pub fn score_tables(tables: &FrequencyTables, grammar_version: &str) -> Vec<CollocationRecord> {
    let scorer = AssociationScorer::new(tables.tokens);
    let mut triples: Vec<_> = tables.triples.iter().collect();
    triples.sort_by(|a, b| a.0.cmp(b.0));

    triples
        .into_iter()
        .map(|(key, counts)| {
            let TripleKey {
                head,
                collocate,
                relation,
            } = key;
            let scores = scorer.score(
                counts.frequency,
                tables.headword_total(head),
                tables.collocate_total(collocate),
            );
            CollocationRecord {
                headword_lemma: head.lemma.clone(),
                headword_pos: head.pos.clone(),
                collocate_lemma: collocate.lemma.clone(),
                collocate_pos: collocate.pos.clone(),
                relation_name: relation.to_string(),
                frequency: counts.frequency,
                logdice_score: scores.log_dice,
                mutual_information: scores.mutual_information,
                t_score: scores.t_score,
                example_sentence_ids: counts.examples.clone(),
                grammar_version: grammar_version.to_string(),
            }
        })
        .collect()
}
