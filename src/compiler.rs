//! Pattern compilation
//!
//! Turns a pattern source into an immutable `CompiledPattern`: an ordered
//! list of slot constraints with gap bounds, plus agreement filters that
//! are applied once a full slot sequence has been found. All validation
//! happens here, so a bad grammar is rejected before any sentence is
//! matched instead of silently never matching.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::grammar::{Rule, parse_pattern};
use crate::pattern::{
    COLLOCATE_LABEL, Constraint, FeatureRef, Gap, GrammarSet, HEAD_LABEL, PatternAst,
    SketchGrammar, merge_constraints,
};
use crate::sentence::Token;
use crate::tagset::Tagsets;

/// Error type for grammar compilation failures
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    #[error("unknown attribute `{attribute}` in `{clause}`")]
    UnknownAttribute { attribute: String, clause: String },

    #[error("POS tests must name a literal tag: `{clause}`")]
    RegexPos { clause: String },

    #[error("invalid regex in `{clause}`: {source}")]
    InvalidRegex {
        clause: String,
        source: regex::Error,
    },

    #[error("unknown POS tag `{tag}` for language `{language}` in `{clause}`")]
    UnknownTag {
        tag: String,
        language: String,
        clause: String,
    },

    #[error("malformed distance bounds `{clause}`")]
    InvalidGap { clause: String },

    #[error("negative distance bound in `{clause}`")]
    NegativeDistance { clause: String },

    #[error("distance bounds out of order ({min} > {max}) in `{clause}`")]
    InvertedDistance { min: i64, max: i64, clause: String },

    #[error("slot label `{label}` declared twice in `{clause}`")]
    DuplicateLabel { label: String, clause: String },

    #[error("undeclared slot label `{label}` in `{clause}`")]
    UndeclaredLabel { label: String, clause: String },

    #[error("malformed feature reference in `{clause}`")]
    InvalidFeatureRef { clause: String },

    #[error("pattern has no slot labeled `{label}`")]
    MissingSlot { label: &'static str },

    #[error("grammar `{name}`: {source}")]
    InGrammar {
        name: String,
        source: Box<CompileError>,
    },
}

/// One slot of a compiled pattern
#[derive(Debug, Clone)]
pub struct CompiledSlot {
    pub label: Option<String>,
    pub constraint: Constraint,
}

/// Post-match filter: two bound slots must carry equal feature values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    pub left_slot: usize,
    pub left_feature: String,
    pub right_slot: usize,
    pub right_feature: String,
}

impl Agreement {
    /// A missing feature on either side counts as disagreement
    pub fn holds(&self, tokens: &[Token], positions: &[usize]) -> bool {
        let left = tokens[positions[self.left_slot]]
            .features
            .get(&self.left_feature);
        let right = tokens[positions[self.right_slot]]
            .features
            .get(&self.right_feature);
        matches!((left, right), (Some(l), Some(r)) if l == r)
    }
}

/// Executable form of a relation pattern
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub language: String,
    pub slots: Vec<CompiledSlot>,
    /// `gaps[i]` bounds the tokens between `slots[i]` and `slots[i + 1]`
    pub gaps: Vec<Gap>,
    pub filters: Vec<Agreement>,
    pub head: usize,
    pub collocate: usize,
    /// Fewest tokens a sentence needs to contain a match
    pub min_span: usize,
}

/// A compiled grammar with the metadata the aggregator needs
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub name: Arc<str>,
    pub pattern: CompiledPattern,
    pub bidirectional: bool,
    pub priority: i32,
    pub active: bool,
}

/// All grammars of one run, ordered by `(priority, name)`
#[derive(Debug, Clone)]
pub struct CompiledGrammarSet {
    pub version: String,
    /// Hash over every definition; ties cached analyses to this set
    pub fingerprint: String,
    pub grammars: Vec<CompiledGrammar>,
}

impl CompiledGrammarSet {
    pub fn active(&self) -> impl Iterator<Item = &CompiledGrammar> {
        self.grammars.iter().filter(|g| g.active)
    }
}

/// Compile a pattern source for a language
pub fn compile(
    pattern_source: &str,
    language: &str,
    tagsets: &Tagsets,
) -> Result<CompiledPattern, CompileError> {
    let ast = parse_pattern(pattern_source)?;
    lower(ast, pattern_source, language, tagsets)
}

/// Compile a grammar definition, including its out-of-source POS and
/// agreement constraints
pub fn compile_grammar(
    grammar: &SketchGrammar,
    tagsets: &Tagsets,
) -> Result<CompiledGrammar, CompileError> {
    let in_grammar = |source: CompileError| CompileError::InGrammar {
        name: grammar.pattern_name.clone(),
        source: Box::new(source),
    };

    let mut ast = parse_pattern(&grammar.pattern_source).map_err(in_grammar)?;

    for (label, tags) in &grammar.pos_constraints {
        let clause = format!("pos_constraints[{}] = {:?}", label, tags);
        let Some(slot) = ast
            .slots
            .iter_mut()
            .find(|s| s.label.as_deref() == Some(label.as_str()))
        else {
            return Err(in_grammar(CompileError::UndeclaredLabel {
                label: label.clone(),
                clause,
            }));
        };
        let mut alternatives: Vec<Constraint> =
            tags.iter().map(|t| Constraint::Pos(t.clone())).collect();
        let allowed = match alternatives.len() {
            0 => Constraint::Any,
            1 => alternatives.remove(0),
            _ => Constraint::Or(alternatives),
        };
        slot.constraint = merge_constraints(&slot.constraint, &allowed);
        slot.clause = format!("{} + {}", slot.clause, clause);
    }

    for (left, right) in &grammar.agreement_constraints {
        let clause = format!("agree {} = {}", left, right);
        let (Some(left), Some(right)) = (FeatureRef::parse(left), FeatureRef::parse(right)) else {
            return Err(in_grammar(CompileError::InvalidFeatureRef { clause }));
        };
        ast.agreements.push(crate::pattern::AgreementSpec {
            left,
            right,
            clause,
        });
    }

    let pattern = lower(
        ast,
        &grammar.pattern_source,
        &grammar.language,
        tagsets,
    )
    .map_err(in_grammar)?;

    Ok(CompiledGrammar {
        name: Arc::from(grammar.pattern_name.as_str()),
        pattern,
        bidirectional: grammar.bidirectional,
        priority: grammar.priority,
        active: grammar.active,
    })
}

/// Compile every grammar of a set; the first failure rejects the set
pub fn compile_set(set: &GrammarSet, tagsets: &Tagsets) -> Result<CompiledGrammarSet, CompileError> {
    let mut grammars = set
        .grammars
        .iter()
        .map(|g| compile_grammar(g, tagsets))
        .collect::<Result<Vec<_>, _>>()?;
    grammars.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    Ok(CompiledGrammarSet {
        version: set.version.clone(),
        fingerprint: fingerprint(set),
        grammars,
    })
}

fn fingerprint(set: &GrammarSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(set.version.as_bytes());
    for g in &set.grammars {
        hasher.update([0x1e]);
        for field in [&g.pattern_name, &g.pattern_source, &g.language] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        for (label, tags) in &g.pos_constraints {
            hasher.update(label.as_bytes());
            hasher.update(tags.join("|").as_bytes());
            hasher.update([0x1f]);
        }
        for (left, right) in &g.agreement_constraints {
            hasher.update(left.as_bytes());
            hasher.update(right.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([g.bidirectional as u8, g.active as u8]);
        hasher.update(g.priority.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Validate an AST and lower it into matcher form
fn lower(
    ast: PatternAst,
    source: &str,
    language: &str,
    tagsets: &Tagsets,
) -> Result<CompiledPattern, CompileError> {
    let PatternAst {
        slots,
        gaps,
        agreements,
    } = ast;

    // labels: unique, resolvable
    let mut labels: Vec<&str> = Vec::new();
    for slot in &slots {
        if let Some(label) = slot.label.as_deref() {
            if labels.contains(&label) {
                return Err(CompileError::DuplicateLabel {
                    label: label.to_string(),
                    clause: slot.clause.clone(),
                });
            }
            labels.push(label);
        }
    }
    let slot_of = |label: &str| labels_position(&slots, label);

    let head = slot_of(HEAD_LABEL).ok_or(CompileError::MissingSlot { label: HEAD_LABEL })?;
    let collocate = slot_of(COLLOCATE_LABEL).ok_or(CompileError::MissingSlot {
        label: COLLOCATE_LABEL,
    })?;

    // POS tags must exist in the language's tagset
    for slot in &slots {
        for tag in slot.constraint.pos_tags() {
            if !tagsets.is_known(language, tag) {
                return Err(CompileError::UnknownTag {
                    tag: tag.to_string(),
                    language: language.to_string(),
                    clause: slot.clause.clone(),
                });
            }
        }
    }

    // distance bounds: non-negative and ordered
    let mut compiled_gaps = Vec::with_capacity(gaps.len());
    for gap in gaps {
        let Some(gap) = gap else {
            compiled_gaps.push(Gap::ADJACENT);
            continue;
        };
        if gap.min < 0 || gap.max < 0 {
            return Err(CompileError::NegativeDistance { clause: gap.clause });
        }
        if gap.min > gap.max {
            return Err(CompileError::InvertedDistance {
                min: gap.min,
                max: gap.max,
                clause: gap.clause,
            });
        }
        compiled_gaps.push(Gap {
            min: gap.min as usize,
            max: gap.max as usize,
        });
    }

    // agreement rules must reference declared labels
    let mut filters = Vec::with_capacity(agreements.len());
    for rule in agreements {
        let resolve = |r: &FeatureRef| {
            slot_of(&r.label).ok_or_else(|| CompileError::UndeclaredLabel {
                label: r.label.clone(),
                clause: rule.clause.clone(),
            })
        };
        filters.push(Agreement {
            left_slot: resolve(&rule.left)?,
            left_feature: rule.left.feature.clone(),
            right_slot: resolve(&rule.right)?,
            right_feature: rule.right.feature.clone(),
        });
    }

    let min_span = slots.len() + compiled_gaps.iter().map(|g| g.min).sum::<usize>();

    Ok(CompiledPattern {
        source: source.to_string(),
        language: language.to_string(),
        slots: slots
            .into_iter()
            .map(|s| CompiledSlot {
                label: s.label,
                constraint: s.constraint,
            })
            .collect(),
        gaps: compiled_gaps,
        filters,
        head,
        collocate,
        min_span,
    })
}

fn labels_position(slots: &[crate::pattern::SlotSpec], label: &str) -> Option<usize> {
    slots.iter().position(|s| s.label.as_deref() == Some(label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagsets() -> Tagsets {
        Tagsets::universal()
    }

    #[test]
    fn test_compile_simple_pattern() {
        let pattern = compile(
            r#"1:[pos="NOUN"] {0,2} [] 2:[pos="ADJ"]; agree 1.Case = 2.Case"#,
            "sl",
            &tagsets(),
        )
        .unwrap();

        assert_eq!(pattern.slots.len(), 3);
        assert_eq!(pattern.head, 0);
        assert_eq!(pattern.collocate, 2);
        assert_eq!(pattern.gaps, vec![Gap { min: 0, max: 2 }, Gap::ADJACENT]);
        assert_eq!(pattern.min_span, 3);
        assert_eq!(
            pattern.filters,
            vec![Agreement {
                left_slot: 0,
                left_feature: "Case".to_string(),
                right_slot: 2,
                right_feature: "Case".to_string(),
            }]
        );
    }

    #[test]
    fn test_collocate_may_precede_head() {
        let pattern = compile(r#"2:[pos="ADJ"] 1:[pos="NOUN"]"#, "en", &tagsets()).unwrap();
        assert_eq!(pattern.head, 1);
        assert_eq!(pattern.collocate, 0);
    }

    #[test]
    fn test_unknown_tag_names_clause() {
        let err = compile(r#"1:[pos="NN"] 2:[pos="ADJ"]"#, "en", &tagsets()).unwrap_err();
        match err {
            CompileError::UnknownTag {
                tag,
                language,
                clause,
            } => {
                assert_eq!(tag, "NN");
                assert_eq!(language, "en");
                assert_eq!(clause, r#"1:[pos="NN"]"#);
            }
            other => panic!("Expected UnknownTag, got {:?}", other),
        }

        let en = Tagsets::universal().with_language("en", ["NN"]);
        assert!(compile(r#"1:[pos="NN"] 2:[pos="ADJ"]"#, "en", &en).is_ok());
    }

    #[test]
    fn test_undeclared_agreement_label() {
        let err = compile(r#"1:[] 2:[]; agree 1.Case = 3.Case"#, "en", &tagsets()).unwrap_err();
        match err {
            CompileError::UndeclaredLabel { label, clause } => {
                assert_eq!(label, "3");
                assert_eq!(clause, "agree 1.Case = 3.Case");
            }
            other => panic!("Expected UndeclaredLabel, got {:?}", other),
        }
    }

    #[test]
    fn test_distance_bounds() {
        assert!(matches!(
            compile(r#"1:[] {-1,2} 2:[]"#, "en", &tagsets()),
            Err(CompileError::NegativeDistance { .. })
        ));
        match compile(r#"1:[] {3,1} 2:[]"#, "en", &tagsets()) {
            Err(CompileError::InvertedDistance { min, max, clause }) => {
                assert_eq!((min, max), (3, 1));
                assert_eq!(clause, "{3,1}");
            }
            other => panic!("Expected InvertedDistance, got {:?}", other),
        }
    }

    #[test]
    fn test_labels() {
        assert!(matches!(
            compile(r#"1:[] 1:[]"#, "en", &tagsets()),
            Err(CompileError::DuplicateLabel { .. })
        ));
        assert!(matches!(
            compile(r#"1:[] x:[]"#, "en", &tagsets()),
            Err(CompileError::MissingSlot { label: "2" })
        ));
        assert!(matches!(
            compile(r#"[] 2:[]"#, "en", &tagsets()),
            Err(CompileError::MissingSlot { label: "1" })
        ));
    }

    #[test]
    fn test_grammar_constraints_are_merged() {
        let grammar = SketchGrammar::new("modifier", r#"1:[] 2:[]"#, "en")
            .with_pos("1", &["NOUN", "PROPN"])
            .with_pos("2", &["ADJ"])
            .with_agreement("1.Number", "2.Number");
        let compiled = compile_grammar(&grammar, &tagsets()).unwrap();

        assert_eq!(&*compiled.name, "modifier");
        assert_eq!(
            compiled.pattern.slots[0].constraint,
            Constraint::Or(vec![
                Constraint::Pos("NOUN".to_string()),
                Constraint::Pos("PROPN".to_string()),
            ])
        );
        assert_eq!(
            compiled.pattern.slots[1].constraint,
            Constraint::Pos("ADJ".to_string())
        );
        assert_eq!(compiled.pattern.filters.len(), 1);
    }

    #[test]
    fn test_grammar_errors_name_the_grammar() {
        let grammar = SketchGrammar::new("broken", r#"1:[] 2:[]"#, "en").with_pos("3", &["NOUN"]);
        match compile_grammar(&grammar, &tagsets()) {
            Err(CompileError::InGrammar { name, source }) => {
                assert_eq!(name, "broken");
                assert!(matches!(*source, CompileError::UndeclaredLabel { .. }));
            }
            other => panic!("Expected InGrammar, got {:?}", other),
        }

        let grammar = SketchGrammar::new("badtag", r#"1:[] 2:[]"#, "en").with_pos("1", &["NN"]);
        assert!(compile_grammar(&grammar, &tagsets()).is_err());
    }

    #[test]
    fn test_compile_set_orders_by_priority() {
        let set = GrammarSet::new(
            "v1",
            vec![
                SketchGrammar::new("b", r#"1:[] 2:[]"#, "en").with_priority(1),
                SketchGrammar::new("c", r#"1:[] 2:[]"#, "en").inactive(),
                SketchGrammar::new("a", r#"1:[] 2:[]"#, "en").with_priority(1),
            ],
        );
        let compiled = compile_set(&set, &tagsets()).unwrap();
        let names: Vec<_> = compiled.grammars.iter().map(|g| &*g.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(compiled.active().count(), 2);

        let mut changed = set.clone();
        changed.grammars[0].pattern_source = r#"1:[] {0,1} 2:[]"#.to_string();
        assert_ne!(
            compiled.fingerprint,
            compile_set(&changed, &tagsets()).unwrap().fingerprint
        );
    }
}
