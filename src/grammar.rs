//! Relation pattern parser
//!
//! Parses pattern sources into a `PatternAst` using the pest grammar in
//! `sketch_grammar.pest`. Only syntax and value-level checks (attribute
//! names, regexes) happen here; label and tagset validation is left to the
//! compiler.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use regex::Regex;

use crate::compiler::CompileError;
use crate::pattern::{
    AgreementSpec, Constraint, ConstraintValue, FeatureRef, GapSpec, PatternAst, SlotSpec,
};

#[derive(Parser)]
#[grammar = "sketch_grammar.pest"]
struct SketchParser;

/// Parse a pattern source into its AST
pub fn parse_pattern(input: &str) -> Result<PatternAst, CompileError> {
    let mut pairs =
        SketchParser::parse(Rule::pattern, input).map_err(|e| CompileError::Syntax(Box::new(e)))?;
    let mut ast = PatternAst {
        slots: Vec::new(),
        gaps: Vec::new(),
        agreements: Vec::new(),
    };

    // pattern always contains exactly one top-level pair on success
    let Some(pattern_pair) = pairs.next() else {
        return Ok(ast);
    };

    for item in pattern_pair.into_inner() {
        match item.as_rule() {
            Rule::sequence => parse_sequence(item, &mut ast)?,
            Rule::agreement => ast.agreements.push(parse_agreement(item)?),
            Rule::EOI => {}
            _ => unreachable!("unexpected pattern item: {:?}", item.as_rule()),
        }
    }

    Ok(ast)
}

/// Parse the slot sequence, recording an (optional) gap before every slot
/// but the first
fn parse_sequence(pair: Pair<Rule>, ast: &mut PatternAst) -> Result<(), CompileError> {
    let mut pending_gap = None;
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::gap => pending_gap = Some(parse_gap(item)?),
            Rule::slot => {
                if !ast.slots.is_empty() {
                    ast.gaps.push(pending_gap.take());
                }
                ast.slots.push(parse_slot(item)?);
            }
            _ => unreachable!("unexpected sequence item: {:?}", item.as_rule()),
        }
    }
    Ok(())
}

fn parse_slot(pair: Pair<Rule>) -> Result<SlotSpec, CompileError> {
    let clause = pair.as_str().to_string();
    let mut label = None;
    let mut constraint = Constraint::Any;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::label => label = Some(item.as_str().to_string()),
            Rule::disjunction => constraint = parse_disjunction(item, &clause)?,
            _ => unreachable!("unexpected slot item: {:?}", item.as_rule()),
        }
    }

    Ok(SlotSpec {
        label,
        constraint,
        clause,
    })
}

fn parse_gap(pair: Pair<Rule>) -> Result<GapSpec, CompileError> {
    let clause = pair.as_str().to_string();
    let mut bounds = pair.into_inner().map(|b| b.as_str().parse::<i64>());
    let (Some(Ok(min)), Some(Ok(max))) = (bounds.next(), bounds.next()) else {
        return Err(CompileError::InvalidGap { clause });
    };
    Ok(GapSpec { min, max, clause })
}

fn parse_disjunction(pair: Pair<Rule>, clause: &str) -> Result<Constraint, CompileError> {
    let mut alternatives = pair
        .into_inner()
        .map(|c| parse_conjunction(c, clause))
        .collect::<Result<Vec<_>, _>>()?;

    if alternatives.len() == 1 {
        Ok(alternatives.remove(0))
    } else {
        Ok(Constraint::Or(alternatives))
    }
}

fn parse_conjunction(pair: Pair<Rule>, clause: &str) -> Result<Constraint, CompileError> {
    let mut constraints = pair
        .into_inner()
        .map(|c| parse_unary(c, clause))
        .collect::<Result<Vec<_>, _>>()?;

    if constraints.len() == 1 {
        Ok(constraints.remove(0))
    } else {
        Ok(Constraint::And(constraints))
    }
}

fn parse_unary(pair: Pair<Rule>, clause: &str) -> Result<Constraint, CompileError> {
    match pair.as_rule() {
        Rule::test => parse_test(pair, clause),
        Rule::disjunction => parse_disjunction(pair, clause),
        Rule::negation => {
            let Some(inner) = pair.into_inner().next() else {
                unreachable!("negation always wraps a constraint");
            };
            Ok(Constraint::Not(Box::new(parse_unary(inner, clause)?)))
        }
        _ => unreachable!("unexpected constraint: {:?}", pair.as_rule()),
    }
}

/// Parse a single test: key="value", key!="value" or key=/regex/
fn parse_test(pair: Pair<Rule>, clause: &str) -> Result<Constraint, CompileError> {
    let test_text = pair.as_str().to_string();
    let mut inner = pair.into_inner();
    let (Some(attribute), Some(operator), Some(value)) = (inner.next(), inner.next(), inner.next())
    else {
        unreachable!("test always has attribute, operator and value");
    };

    let value_text = value
        .clone()
        .into_inner()
        .next()
        .map(|v| v.as_str().to_string())
        .unwrap_or_default();
    let value = match value.as_rule() {
        Rule::regex => {
            let anchored = format!("^(?:{})$", value_text);
            let compiled = Regex::new(&anchored).map_err(|source| CompileError::InvalidRegex {
                clause: test_text.clone(),
                source,
            })?;
            ConstraintValue::Regex(value_text, compiled)
        }
        _ => ConstraintValue::Literal(value_text),
    };

    let constraint = match attribute.as_rule() {
        Rule::feature_attr => {
            let name = attribute.into_inner().as_str().to_string();
            Constraint::Feature(name, value)
        }
        _ => match attribute.as_str() {
            "lemma" => Constraint::Lemma(value),
            "form" | "word" => Constraint::Form(value),
            "pos" | "tag" => match value {
                ConstraintValue::Literal(tag) => Constraint::Pos(tag),
                ConstraintValue::Regex(..) => {
                    return Err(CompileError::RegexPos { clause: test_text });
                }
            },
            other => {
                return Err(CompileError::UnknownAttribute {
                    attribute: other.to_string(),
                    clause: clause.to_string(),
                });
            }
        },
    };

    if operator.as_str() == "!=" {
        Ok(Constraint::Not(Box::new(constraint)))
    } else {
        Ok(constraint)
    }
}

fn parse_agreement(pair: Pair<Rule>) -> Result<AgreementSpec, CompileError> {
    let clause = pair.as_str().to_string();
    let mut refs = pair.into_inner().map(|r| FeatureRef::parse(r.as_str()));
    match (refs.next(), refs.next()) {
        (Some(Some(left)), Some(Some(right))) => Ok(AgreementSpec {
            left,
            right,
            clause,
        }),
        _ => Err(CompileError::InvalidFeatureRef { clause }),
    }
}
