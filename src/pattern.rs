//! Pattern representation
//!
//! This module defines the AST for relation patterns (slot constraints,
//! gaps and agreement rules) and the `SketchGrammar` definitions that carry
//! pattern sources together with their metadata.

use crate::sentence::Token;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// Label of the headword slot
pub const HEAD_LABEL: &str = "1";
/// Label of the collocate slot
pub const COLLOCATE_LABEL: &str = "2";

/// Value in a constraint: either a literal string or a regex pattern
#[derive(Clone)]
pub enum ConstraintValue {
    Literal(String),
    Regex(String, Regex), // Pattern string + compiled, fully anchored regex
}

impl ConstraintValue {
    pub fn matches(&self, s: &str) -> bool {
        match self {
            ConstraintValue::Literal(lit) => lit == s,
            ConstraintValue::Regex(_, re) => re.is_match(s),
        }
    }
}

// Manual Debug implementation
impl Debug for ConstraintValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintValue::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            ConstraintValue::Regex(pattern, _) => f.debug_tuple("Regex").field(pattern).finish(),
        }
    }
}

// Manual PartialEq implementation (compare pattern strings, not compiled regex)
impl PartialEq for ConstraintValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstraintValue::Literal(a), ConstraintValue::Literal(b)) => a == b,
            (ConstraintValue::Regex(a, _), ConstraintValue::Regex(b, _)) => a == b,
            _ => false,
        }
    }
}

/// Token-level test for a single slot
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Any,
    Lemma(ConstraintValue),
    Pos(String),
    Form(ConstraintValue),
    Feature(String, ConstraintValue),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Not(Box<Constraint>),
}

impl Constraint {
    pub fn is_any(&self) -> bool {
        matches!(self, Constraint::Any)
    }

    pub fn matches(&self, token: &Token) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::Lemma(value) => value.matches(&token.lemma),
            Constraint::Pos(tag) => token.pos_tag == *tag,
            Constraint::Form(value) => value.matches(&token.surface_form),
            Constraint::Feature(key, value) => token
                .features
                .get(key)
                .is_some_and(|actual| value.matches(actual)),
            Constraint::And(constraints) => constraints.iter().all(|c| c.matches(token)),
            Constraint::Or(constraints) => constraints.iter().any(|c| c.matches(token)),
            Constraint::Not(inner) => !inner.matches(token),
        }
    }

    /// Every POS tag named anywhere in the constraint
    pub fn pos_tags(&self) -> Vec<&str> {
        let mut tags = Vec::new();
        self.collect_pos_tags(&mut tags);
        tags
    }

    fn collect_pos_tags<'a>(&'a self, tags: &mut Vec<&'a str>) {
        match self {
            Constraint::Pos(tag) => tags.push(tag),
            Constraint::And(cs) | Constraint::Or(cs) => {
                cs.iter().for_each(|c| c.collect_pos_tags(tags))
            }
            Constraint::Not(inner) => inner.collect_pos_tags(tags),
            _ => {}
        }
    }
}

/// Conjunction of two constraints, flattening nested `And`s
pub fn merge_constraints(a: &Constraint, b: &Constraint) -> Constraint {
    match (&a, &b) {
        (&x, &Constraint::Any) | (&Constraint::Any, &x) => x.clone(),
        (&Constraint::And(x_list), &Constraint::And(y_list)) => Constraint::And(
            x_list
                .iter()
                .cloned()
                .chain(y_list.iter().cloned())
                .collect(),
        ),
        (&Constraint::And(x_list), &y) | (&y, &Constraint::And(x_list)) => {
            let y_list = std::iter::once(y.clone());
            Constraint::And(x_list.iter().cloned().chain(y_list).collect())
        }
        (&x, &y) => Constraint::And(vec![x.clone(), y.clone()]),
    }
}

/// A slot of the pattern sequence
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSpec {
    pub label: Option<String>,
    pub constraint: Constraint,
    /// Source text of the slot, for error reporting
    pub clause: String,
}

/// Bounds on the number of tokens between two consecutive slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub min: usize,
    pub max: usize,
}

impl Gap {
    pub const ADJACENT: Gap = Gap { min: 0, max: 0 };
}

/// A gap as written, before bounds are validated
#[derive(Debug, Clone, PartialEq)]
pub struct GapSpec {
    pub min: i64,
    pub max: i64,
    pub clause: String,
}

/// Reference to a morphological feature of a labeled slot (`1.Case`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRef {
    pub label: String,
    pub feature: String,
}

impl FeatureRef {
    /// Parse `label.Feature`
    pub fn parse(s: &str) -> Option<Self> {
        let (label, feature) = s.trim().split_once('.')?;
        if label.is_empty() || feature.is_empty() {
            return None;
        }
        Some(Self {
            label: label.to_string(),
            feature: feature.to_string(),
        })
    }
}

/// Agreement rule as written
#[derive(Debug, Clone, PartialEq)]
pub struct AgreementSpec {
    pub left: FeatureRef,
    pub right: FeatureRef,
    pub clause: String,
}

/// Parsed but not yet validated pattern
#[derive(Debug, Clone, PartialEq)]
pub struct PatternAst {
    pub slots: Vec<SlotSpec>,
    /// `gaps[i]` sits between `slots[i]` and `slots[i + 1]`
    pub gaps: Vec<Option<GapSpec>>,
    pub agreements: Vec<AgreementSpec>,
}

fn default_true() -> bool {
    true
}

/// A named grammatical relation pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchGrammar {
    pub pattern_name: String,
    pub pattern_source: String,
    pub language: String,
    /// Allowed POS tags per slot label, on top of the inline source
    #[serde(default)]
    pub pos_constraints: BTreeMap<String, Vec<String>>,
    /// Extra agreement rules as `("1.Case", "2.Case")` pairs
    #[serde(default)]
    pub agreement_constraints: Vec<(String, String)>,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl SketchGrammar {
    pub fn new(pattern_name: &str, pattern_source: &str, language: &str) -> Self {
        Self {
            pattern_name: pattern_name.to_string(),
            pattern_source: pattern_source.to_string(),
            language: language.to_string(),
            pos_constraints: BTreeMap::new(),
            agreement_constraints: Vec::new(),
            bidirectional: false,
            priority: 0,
            active: true,
        }
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_pos(mut self, label: &str, tags: &[&str]) -> Self {
        self.pos_constraints.insert(
            label.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_agreement(mut self, left: &str, right: &str) -> Self {
        self.agreement_constraints
            .push((left.to_string(), right.to_string()));
        self
    }
}

/// A versioned set of grammars, loaded together for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrammarSet {
    pub version: String,
    pub grammars: Vec<SketchGrammar>,
}

impl GrammarSet {
    pub fn new(version: &str, grammars: Vec<SketchGrammar>) -> Self {
        Self {
            version: version.to_string(),
            grammars,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, crate::config::ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| crate::config::ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| crate::config::ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::Features;

    fn lit(s: &str) -> ConstraintValue {
        ConstraintValue::Literal(s.to_string())
    }

    #[test]
    fn test_constraint_matching() {
        let token = Token::new("houses", "house", "NOUN").with_features(Features::parse("Number=Plur"));

        assert!(Constraint::Any.matches(&token));
        assert!(Constraint::Pos("NOUN".to_string()).matches(&token));
        assert!(Constraint::Lemma(lit("house")).matches(&token));
        assert!(!Constraint::Form(lit("house")).matches(&token));
        assert!(Constraint::Feature("Number".to_string(), lit("Plur")).matches(&token));
        assert!(!Constraint::Feature("Case".to_string(), lit("Nom")).matches(&token));

        let either = Constraint::Or(vec![
            Constraint::Pos("VERB".to_string()),
            Constraint::Pos("NOUN".to_string()),
        ]);
        assert!(either.matches(&token));
        assert!(!Constraint::Not(Box::new(either)).matches(&token));

        let re = ConstraintValue::Regex("hou.*".to_string(), Regex::new("^(?:hou.*)$").unwrap());
        assert!(Constraint::Lemma(re).matches(&token));
    }

    #[test]
    fn test_merge_constraints() {
        let a = Constraint::Pos("NOUN".to_string());
        let b = Constraint::Lemma(lit("house"));

        assert_eq!(merge_constraints(&a, &Constraint::Any), a);
        assert_eq!(
            merge_constraints(&a, &b),
            Constraint::And(vec![a.clone(), b.clone()])
        );
        let ab = merge_constraints(&a, &b);
        match merge_constraints(&ab, &ab) {
            Constraint::And(list) => assert_eq!(list.len(), 4),
            other => panic!("Expected And constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_pos_tags() {
        let c = Constraint::And(vec![
            Constraint::Or(vec![
                Constraint::Pos("NOUN".to_string()),
                Constraint::Pos("PROPN".to_string()),
            ]),
            Constraint::Not(Box::new(Constraint::Lemma(lit("thing")))),
        ]);
        assert_eq!(c.pos_tags(), vec!["NOUN", "PROPN"]);
    }

    #[test]
    fn test_feature_ref() {
        assert_eq!(
            FeatureRef::parse("1.Case"),
            Some(FeatureRef {
                label: "1".to_string(),
                feature: "Case".to_string()
            })
        );
        assert_eq!(FeatureRef::parse("Case"), None);
        assert_eq!(FeatureRef::parse(".Case"), None);
    }

    #[test]
    fn test_grammar_set_json() {
        let json = r#"{
            "version": "2024.1",
            "grammars": [
                {"pattern_name": "modifier", "pattern_source": "1:[pos=\"NOUN\"] 2:[pos=\"ADJ\"]", "language": "en"},
                {"pattern_name": "and_or", "pattern_source": "1:[] [lemma=\"and\"] 2:[]", "language": "en",
                 "bidirectional": true, "priority": 2, "active": false,
                 "agreement_constraints": [["1.Number", "2.Number"]]}
            ]
        }"#;
        let set: GrammarSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.version, "2024.1");
        assert!(set.grammars[0].active);
        assert!(!set.grammars[0].bidirectional);
        assert!(set.grammars[1].bidirectional);
        assert!(!set.grammars[1].active);
        assert_eq!(
            set.grammars[1].agreement_constraints,
            vec![("1.Number".to_string(), "2.Number".to_string())]
        );
    }
}
