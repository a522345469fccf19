//! Word sketch retrieval
//!
//! Read-only access to the collocation records of one grammar version,
//! filtered and ranked deterministically: logDice descending, then
//! frequency descending, then collocate lemma and POS ascending, then
//! relation name. Equal inputs always produce the same list.

use std::cmp::Ordering;

use crate::scorer::CollocationRecord;
use crate::store::{SketchStore, StoreError};

pub const DEFAULT_LIMIT: usize = 25;

/// A sketch request for one headword
#[derive(Debug, Clone, PartialEq)]
pub struct SketchQuery {
    pub headword: String,
    pub pos: Option<String>,
    pub relation: Option<String>,
    pub min_score: Option<f64>,
    pub limit: usize,
}

impl SketchQuery {
    pub fn new(headword: &str) -> Self {
        Self {
            headword: headword.to_string(),
            pos: None,
            relation: None,
            min_score: None,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn pos(mut self, pos: &str) -> Self {
        self.pos = Some(pos.to_string());
        self
    }

    pub fn relation(mut self, relation: &str) -> Self {
        self.relation = Some(relation.to_string());
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn accepts(&self, record: &CollocationRecord) -> bool {
        self.pos.as_deref().is_none_or(|p| record.headword_pos == p)
            && self
                .relation
                .as_deref()
                .is_none_or(|r| record.relation_name == r)
            && self.min_score.is_none_or(|m| record.logdice_score >= m)
    }
}

/// Total ranking order over records
pub fn rank_order(a: &CollocationRecord, b: &CollocationRecord) -> Ordering {
    b.logdice_score
        .total_cmp(&a.logdice_score)
        .then_with(|| b.frequency.cmp(&a.frequency))
        .then_with(|| a.collocate_lemma.cmp(&b.collocate_lemma))
        .then_with(|| a.collocate_pos.cmp(&b.collocate_pos))
        .then_with(|| a.relation_name.cmp(&b.relation_name))
        .then_with(|| a.headword_pos.cmp(&b.headword_pos))
}

/// Filter and rank records for `query`
pub fn rank(records: Vec<CollocationRecord>, query: &SketchQuery) -> Vec<CollocationRecord> {
    let mut selected: Vec<_> = records
        .into_iter()
        .filter(|r| r.headword_lemma == query.headword && query.accepts(r))
        .collect();
    selected.sort_by(rank_order);
    selected.truncate(query.limit);
    selected
}

/// Ranked sketch of `query.headword` under a grammar version
pub fn get_sketch(
    store: &dyn SketchStore,
    version: &str,
    query: &SketchQuery,
) -> Result<Vec<CollocationRecord>, StoreError> {
    let records = store.records_for_headword(version, &query.headword)?;
    Ok(rank(records, query))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(collocate: &str, pos: &str, relation: &str, score: f64, freq: u64) -> CollocationRecord {
        CollocationRecord {
            headword_lemma: "house".to_string(),
            headword_pos: "NOUN".to_string(),
            collocate_lemma: collocate.to_string(),
            collocate_pos: pos.to_string(),
            relation_name: relation.to_string(),
            frequency: freq,
            logdice_score: score,
            mutual_information: 0.0,
            t_score: 0.0,
            example_sentence_ids: Vec::new(),
            grammar_version: "v1".to_string(),
        }
    }

    fn collocates(records: &[CollocationRecord]) -> Vec<&str> {
        records.iter().map(|r| r.collocate_lemma.as_str()).collect()
    }

    fn sample() -> Vec<CollocationRecord> {
        vec![
            record("old", "ADJ", "modifier", 11.0, 3),
            record("big", "ADJ", "modifier", 12.0, 5),
            record("small", "ADJ", "modifier", 11.0, 7),
            record("buy", "VERB", "object_of", 11.0, 3),
            record("tiny", "ADJ", "modifier", 9.5, 1),
        ]
    }

    #[test]
    fn test_ranking_order() {
        let ranked = rank(sample(), &SketchQuery::new("house"));
        // score desc, then frequency desc, then collocate lemma
        assert_eq!(collocates(&ranked), vec!["big", "small", "buy", "old", "tiny"]);
    }

    #[test]
    fn test_ranking_independent_of_input_order() {
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(
            rank(sample(), &SketchQuery::new("house")),
            rank(reversed, &SketchQuery::new("house"))
        );
    }

    #[test]
    fn test_filters_and_limit() {
        let by_relation = rank(sample(), &SketchQuery::new("house").relation("object_of"));
        assert_eq!(collocates(&by_relation), vec!["buy"]);

        let by_score = rank(sample(), &SketchQuery::new("house").min_score(11.0));
        assert_eq!(by_score.len(), 4);

        let limited = rank(sample(), &SketchQuery::new("house").limit(2));
        assert_eq!(collocates(&limited), vec!["big", "small"]);

        assert!(rank(sample(), &SketchQuery::new("house").pos("VERB")).is_empty());
        assert!(rank(sample(), &SketchQuery::new("garden")).is_empty());
    }
}
