//! Pattern matching
//!
//! Evaluates a compiled pattern against one tagged sentence. Every token
//! satisfying the first slot is an anchor; from each anchor the remaining
//! slots are searched left to right inside their gap bounds, backtracking
//! over alternative positions. Every complete slot sequence that passes the
//! agreement filters is reported, so one sentence may yield several matches.
//!
//! Matching is a pure function of the pattern and the sentence.

use serde::{Deserialize, Serialize};

use crate::compiler::CompiledPattern;
use crate::sentence::{TaggedSentence, Token};

/// One successful match: the token position bound to each slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub positions: Vec<usize>,
    /// Token position of the headword
    pub head: usize,
    /// Token position of the collocate
    pub collocate: usize,
}

impl MatchResult {
    pub fn anchor(&self) -> usize {
        self.positions[0]
    }
}

/// Find every match of `pattern` in `sentence`, ordered by anchor position
///
/// Sentences that are empty or shorter than the pattern yield no matches.
pub fn find_matches(pattern: &CompiledPattern, sentence: &TaggedSentence) -> Vec<MatchResult> {
    let tokens = sentence.tokens.as_slice();
    let mut results = Vec::new();
    if pattern.slots.is_empty() || tokens.len() < pattern.min_span {
        return results;
    }

    let mut search = Search {
        pattern,
        tokens,
        positions: vec![0; pattern.slots.len()],
        results: &mut results,
    };

    for anchor in 0..tokens.len() {
        if pattern.slots[0].constraint.matches(&tokens[anchor]) {
            search.positions[0] = anchor;
            search.extend(1);
        }
    }

    results
}

/// Depth-first search state for one sentence
struct Search<'a> {
    pattern: &'a CompiledPattern,
    tokens: &'a [Token],
    positions: Vec<usize>,
    results: &'a mut Vec<MatchResult>,
}

impl Search<'_> {
    fn extend(&mut self, slot: usize) {
        if slot == self.pattern.slots.len() {
            self.accept();
            return;
        }

        let gap = self.pattern.gaps[slot - 1];
        let prev = self.positions[slot - 1];
        let first = prev.saturating_add(1).saturating_add(gap.min);
        let last = prev
            .saturating_add(1)
            .saturating_add(gap.max)
            .min(self.tokens.len().saturating_sub(1));

        let constraint = &self.pattern.slots[slot].constraint;
        for pos in first..=last {
            if constraint.matches(&self.tokens[pos]) {
                self.positions[slot] = pos;
                self.extend(slot + 1);
            }
        }
    }

    /// Apply the agreement filters to a complete sequence
    fn accept(&mut self) {
        let agrees = self
            .pattern
            .filters
            .iter()
            .all(|f| f.holds(self.tokens, &self.positions));
        if agrees {
            self.results.push(MatchResult {
                positions: self.positions.clone(),
                head: self.positions[self.pattern.head],
                collocate: self.positions[self.pattern.collocate],
            });
        }
    }
}
