//! Wordsketch: collocation extraction and association scoring
//!
//! Scans a POS-tagged, lemmatized corpus for headword/collocate pairs that
//! satisfy declarative grammatical relation patterns, counts them, and
//! scores their association strength (logDice, MI, t-score).

// Input
pub mod conllu; // CoNLL-U file parsing
pub mod sentence; // Tokens, tagged sentences, content hashes
pub mod source; // Sentence sources and batch selections

// Relation patterns
pub mod compiler; // Validation and lowering to matcher form
pub mod grammar; // Pattern language parser
pub mod pattern; // Pattern AST and sketch grammar definitions
pub mod tagset; // Known POS tags per language

// Extraction and scoring
pub mod accessibility; // Corpus frequency merged with external norms
pub mod aggregator; // Sharded frequency counting
pub mod cache; // Content-addressed analysis cache
pub mod matcher; // Backtracking slot matcher
pub mod scorer; // logDice, MI, t-score

// Orchestration
pub mod config;
pub mod pipeline; // Batch state machine
pub mod query; // Ranked sketch retrieval
pub mod store; // Persisted tables

// Re-exports for convenience
pub use accessibility::{AccessibilityMerger, AccessibilityScore, NormLookup, NormRecord, NormTable};
pub use aggregator::{Aggregator, CancelToken, FrequencyTables, LemmaPos};
pub use cache::AnalysisCache;
pub use compiler::{CompileError, CompiledGrammarSet, CompiledPattern, compile, compile_set};
pub use config::EngineConfig;
pub use matcher::{MatchResult, find_matches};
pub use pattern::{GrammarSet, SketchGrammar};
pub use pipeline::{BatchStatus, Pipeline, PipelineError, ProcessingBatch};
pub use query::SketchQuery;
pub use scorer::{AssociationScores, CollocationRecord, log_dice};
pub use sentence::{ContentHash, TaggedSentence, Token};
pub use source::{Corpus, FetchedSentences, MemorySource, SentenceSelection, SentenceSource};
pub use store::{MemoryStore, SketchStore, StoreError};
