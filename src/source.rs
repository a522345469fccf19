//! Sentence sources
//!
//! The engine consumes tagged sentences from an external collaborator. A
//! `SentenceSource` hands out the sentences of one batch selection, in
//! corpus order, and must give up once the fetch timeout has passed.
//!
//! Two sources are provided:
//! - `MemorySource`: sentences already in memory
//! - `Corpus`: CoNLL-U files (plain or `.gz`) from explicit paths or a glob

use crate::conllu::{ConllReader, MalformedSentence, ParseError};
use crate::sentence::{SentenceId, SkipReason, SkippedSentence, TaggedSentence};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Which sentences a batch covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentenceSelection {
    /// Half-open id range `start..end`
    Range { start: SentenceId, end: SentenceId },
    /// Explicit id set
    Ids(Vec<SentenceId>),
    /// Every sentence the source has
    All,
}

impl SentenceSelection {
    pub fn contains(&self, id: SentenceId) -> bool {
        match self {
            SentenceSelection::Range { start, end } => (*start..*end).contains(&id),
            SentenceSelection::Ids(ids) => ids.contains(&id),
            SentenceSelection::All => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sentence fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("sentence source unavailable: {0}")]
    Unavailable(String),
}

/// Sentences handed out for one selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedSentences {
    /// Readable sentences, in corpus order
    pub sentences: Vec<TaggedSentence>,
    /// Selected sentences the source could not read
    pub rejected: Vec<SkippedSentence>,
}

impl From<Vec<TaggedSentence>> for FetchedSentences {
    fn from(sentences: Vec<TaggedSentence>) -> Self {
        Self {
            sentences,
            rejected: Vec::new(),
        }
    }
}

/// Supplier of tagged sentences
pub trait SentenceSource: Send + Sync {
    fn fetch(
        &self,
        selection: &SentenceSelection,
        timeout: Duration,
    ) -> Result<FetchedSentences, SourceError>;
}

/// In-memory sentences
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    sentences: Vec<TaggedSentence>,
}

impl MemorySource {
    pub fn new(sentences: Vec<TaggedSentence>) -> Self {
        Self { sentences }
    }
}

impl SentenceSource for MemorySource {
    fn fetch(
        &self,
        selection: &SentenceSelection,
        _timeout: Duration,
    ) -> Result<FetchedSentences, SourceError> {
        let selected: Vec<_> = self
            .sentences
            .iter()
            .filter(|s| selection.contains(s.sentence_id))
            .cloned()
            .collect();
        Ok(selected.into())
    }
}

/// CoNLL-U corpus spread over one or more files
///
/// Files are read in the order given (sorted for globs). Sentences without
/// a numeric `sent_id` are numbered consecutively across files. Sentences
/// that fail to parse are logged and returned as rejected.
#[derive(Debug, Clone)]
pub struct Corpus {
    paths: Vec<PathBuf>,
}

impl Corpus {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self {
            paths: vec![path.as_ref().to_path_buf()],
        }
    }

    /// Files are processed in sorted order for deterministic results.
    pub fn from_glob(pattern: &str) -> Result<Self, glob::PatternError> {
        let mut paths: Vec<PathBuf> = glob::glob(pattern)?.filter_map(Result::ok).collect();
        paths.sort();
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl SentenceSource for Corpus {
    fn fetch(
        &self,
        selection: &SentenceSelection,
        timeout: Duration,
    ) -> Result<FetchedSentences, SourceError> {
        if self.paths.is_empty() {
            return Err(SourceError::Unavailable("corpus has no files".to_string()));
        }

        let started = Instant::now();
        let mut fetched = FetchedSentences::default();
        let mut ordinal = 1;

        for path in &self.paths {
            let reader = ConllReader::from_file(path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            let mut reader = reader.starting_at(ordinal);
            for result in reader.by_ref() {
                if started.elapsed() > timeout {
                    return Err(SourceError::Timeout(timeout));
                }
                match result {
                    Ok(sentence) if selection.contains(sentence.sentence_id) => {
                        fetched.sentences.push(sentence)
                    }
                    Ok(_) => {}
                    Err(MalformedSentence {
                        source: ParseError::Io { source, .. },
                        ..
                    }) => {
                        return Err(SourceError::Io {
                            path: path.clone(),
                            source,
                        });
                    }
                    Err(e) if selection.contains(e.sentence_id) => {
                        warn!(path = %path.display(), "skipping unreadable {}", e);
                        fetched.rejected.push(SkippedSentence {
                            sentence_id: e.sentence_id,
                            reason: SkipReason::Malformed(e.source.to_string()),
                        });
                    }
                    Err(_) => {}
                }
            }
            ordinal = reader.next_ordinal();
        }

        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::Token;
    use std::fs;
    use std::io::Write;
    use tempfile::{TempDir, tempdir};

    /// Helper to create test files with given content
    fn create_test_files(contents: &[(&str, &str)]) -> (TempDir, Vec<PathBuf>) {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();

        for (filename, content) in contents {
            let path = dir.path().join(filename);
            let mut file = fs::File::create(&path).unwrap();
            write!(file, "{}", content).unwrap();
            paths.push(path);
        }

        (dir, paths)
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn test_selection() {
        let range = SentenceSelection::Range { start: 2, end: 4 };
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(3));
        assert!(!range.contains(4));
        assert!(SentenceSelection::Ids(vec![7, 9]).contains(9));
        assert!(SentenceSelection::All.contains(12345));
    }

    #[test]
    fn test_memory_source_keeps_order() {
        let source = MemorySource::new(
            (1..=5)
                .map(|id| TaggedSentence::new(id, vec![Token::new("a", "a", "DET")]))
                .collect(),
        );
        let ids: Vec<_> = source
            .fetch(&SentenceSelection::Ids(vec![4, 2]), TIMEOUT)
            .unwrap()
            .sentences
            .iter()
            .map(|s| s.sentence_id)
            .collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_corpus_from_glob_numbers_across_files() {
        let (dir, _paths) = create_test_files(&[
            (
                "a.conllu",
                "1\tThe\tthe\tDET\tDT\t_\t2\tdet\t_\t_\n2\tdog\tdog\tNOUN\tNN\t_\t0\troot\t_\t_\n\n\
                 1\tCats\tcat\tNOUN\tNNS\t_\t2\tnsubj\t_\t_\n",
            ),
            ("b.conllu", "1\truns\trun\tVERB\tVBZ\t_\t0\troot\t_\t_\n"),
            ("other.txt", "ignored"),
        ]);

        let corpus = Corpus::from_glob(&format!("{}/*.conllu", dir.path().display())).unwrap();
        assert_eq!(corpus.paths().len(), 2);

        let fetched = corpus.fetch(&SentenceSelection::All, TIMEOUT).unwrap();
        let ids: Vec<_> = fetched.sentences.iter().map(|s| s.sentence_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(fetched.rejected.is_empty());

        let selected = corpus
            .fetch(&SentenceSelection::Range { start: 2, end: 4 }, TIMEOUT)
            .unwrap()
            .sentences;
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[1].tokens[0].lemma, "run");
    }

    #[test]
    fn test_corpus_reads_gzip() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempdir().unwrap();
        let path = dir.path().join("c.conllu.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        write!(encoder, "1\tsleeps\tsleep\tVERB\tVBZ\t_\t0\troot\t_\t_\n").unwrap();
        encoder.finish().unwrap();

        let sentences = Corpus::from_file(&path)
            .fetch(&SentenceSelection::All, TIMEOUT)
            .unwrap()
            .sentences;
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].tokens[0].lemma, "sleep");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let corpus = Corpus::from_file(dir.path().join("nonexistent.conllu"));
        assert!(matches!(
            corpus.fetch(&SentenceSelection::All, TIMEOUT),
            Err(SourceError::Io { .. })
        ));
    }

    #[test]
    fn test_unreadable_sentences_are_rejected() {
        let (_dir, paths) = create_test_files(&[(
            "a.conllu",
            "1\tdogs\tdog\tNOUN\tNNS\t_\t0\troot\t_\t_\n\n\
             1\tbroken\tline\n\n\
             # sent_id = 8\n1\tcat\n\n\
             1\truns\trun\tVERB\tVBZ\t_\t0\troot\t_\t_\n",
        )]);
        let corpus = Corpus::from_paths(paths);

        let fetched = corpus.fetch(&SentenceSelection::All, TIMEOUT).unwrap();
        let ids: Vec<_> = fetched.sentences.iter().map(|s| s.sentence_id).collect();
        assert_eq!(ids, vec![1, 4]);
        let rejected: Vec<_> = fetched.rejected.iter().map(|s| s.sentence_id).collect();
        assert_eq!(rejected, vec![2, 8]);
        assert!(matches!(fetched.rejected[0].reason, SkipReason::Malformed(_)));

        let selected = corpus
            .fetch(&SentenceSelection::Range { start: 1, end: 3 }, TIMEOUT)
            .unwrap();
        assert_eq!(selected.sentences.len(), 1);
        assert_eq!(selected.rejected.len(), 1);
        assert_eq!(selected.rejected[0].sentence_id, 2);
    }

    #[test]
    fn test_empty_corpus_is_unavailable() {
        assert!(matches!(
            Corpus::from_paths(Vec::new()).fetch(&SentenceSelection::All, TIMEOUT),
            Err(SourceError::Unavailable(_))
        ));
    }
}
