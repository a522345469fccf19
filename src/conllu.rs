//! CoNLL-U file parsing
//!
//! Reads CoNLL-U text (plain or gzip-compressed) into `TaggedSentence`s.
//! Only the columns the engine needs are kept: FORM, LEMMA, UPOS and FEATS.
//! Multiword token ranges and empty nodes are skipped.
//!
//! CoNLL-U format: https://universaldependencies.org/format.html

use crate::sentence::{Features, SentenceId, TaggedSentence, Token};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use thiserror::Error;

/// Error during CoNLL-U parsing
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error at line {line_num}: {source}")]
    Io {
        line_num: usize,
        source: std::io::Error,
    },

    #[error("parse error at line {line_num}: {message}")]
    Line { line_num: usize, message: String },
}

/// A sentence the reader had to give up on
#[derive(Debug, Error)]
#[error("sentence {sentence_id}: {source}")]
pub struct MalformedSentence {
    /// Numeric `sent_id`, or the ordinal the sentence consumed
    pub sentence_id: SentenceId,
    #[source]
    pub source: ParseError,
}

enum TokenKind {
    Word,
    Range,
    Empty,
}

/// Reader that iterates over the sentences of a CoNLL-U stream
pub struct ConllReader {
    reader: Box<dyn BufRead + Send>,
    buffer: String,
    line_num: usize,
    next_ordinal: SentenceId,
}

impl ConllReader {
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            buffer: String::new(),
            line_num: 0,
            next_ordinal: 1,
        }
    }

    /// Open a file; `.gz` files are decompressed transparently
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
        if is_gzip {
            Ok(Self::new(BufReader::new(MultiGzDecoder::new(file))))
        } else {
            Ok(Self::new(BufReader::new(file)))
        }
    }

    pub fn from_string(text: &str) -> Self {
        Self::new(Cursor::new(text.to_string()))
    }

    /// Number sentences without a numeric `sent_id` starting from `ordinal`
    pub fn starting_at(mut self, ordinal: SentenceId) -> Self {
        self.next_ordinal = ordinal;
        self
    }

    /// Ordinal that the next sentence without a numeric `sent_id` receives
    pub fn next_ordinal(&self) -> SentenceId {
        self.next_ordinal
    }

    fn read_line(&mut self) -> Result<bool, ParseError> {
        self.buffer.clear();
        self.line_num += 1;
        match self.reader.read_line(&mut self.buffer) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(source) => Err(ParseError::Io {
                line_num: self.line_num,
                source,
            }),
        }
    }
}

impl Iterator for ConllReader {
    type Item = Result<TaggedSentence, MalformedSentence>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut tokens = Vec::new();
        let mut sent_id = None;
        let mut text = None;
        let mut aligned_text = None;
        let mut error = None;
        let mut seen_content = false;

        loop {
            match self.read_line() {
                Ok(true) => {}
                Ok(false) => break,
                Err(source) => {
                    return Some(Err(MalformedSentence {
                        sentence_id: self.next_ordinal,
                        source,
                    }));
                }
            }
            let line = self.buffer.trim_end_matches(['\n', '\r']);

            if line.trim().is_empty() {
                if seen_content {
                    break;
                }
                continue;
            }
            seen_content = true;

            if let Some(comment) = line.strip_prefix('#') {
                if let Some((key, value)) = comment.split_once('=') {
                    let value = value.trim().to_string();
                    match key.trim() {
                        "sent_id" => sent_id = Some(value),
                        "text" => text = Some(value),
                        "translation" | "text_en" => aligned_text = Some(value),
                        _ => {}
                    }
                }
                continue;
            }

            if error.is_some() {
                // keep consuming lines up to the sentence boundary
                continue;
            }
            match parse_line(line, self.line_num) {
                Ok(Some(token)) => tokens.push(token),
                Ok(None) => {}
                Err(e) => error = Some(e),
            }
        }

        if !seen_content {
            return None;
        }

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let sentence_id = sent_id
            .as_deref()
            .and_then(|id| id.parse::<SentenceId>().ok())
            .unwrap_or(ordinal);

        if let Some(source) = error {
            return Some(Err(MalformedSentence {
                sentence_id,
                source,
            }));
        }
        let mut sentence = TaggedSentence::new(sentence_id, tokens);
        sentence.text = text;
        sentence.aligned_text = aligned_text;
        Some(Ok(sentence))
    }
}

/// Parse a single token line; `None` for multiword ranges and empty nodes
fn parse_line(line: &str, line_num: usize) -> Result<Option<Token>, ParseError> {
    let bytes = line.as_bytes();
    let mut fields: [&str; 10] = [""; 10];
    let mut start = 0;
    let mut count = 0;
    for end in memchr::memchr_iter(b'\t', bytes).chain(std::iter::once(bytes.len())) {
        if count == fields.len() {
            count += 1;
            break;
        }
        fields[count] = &line[start..end];
        count += 1;
        start = end + 1;
    }

    if count != 10 {
        return Err(ParseError::Line {
            line_num,
            message: format!("expected 10 fields, found {}", count),
        });
    }

    match token_kind(fields[0]) {
        Some(TokenKind::Word) => {}
        Some(TokenKind::Range) | Some(TokenKind::Empty) => return Ok(None),
        None => {
            return Err(ParseError::Line {
                line_num,
                message: format!("invalid ID: {}", fields[0]),
            });
        }
    }

    // A missing lemma is kept as "_" so sentence validation can reject it
    let token = Token {
        surface_form: fields[1].to_string(),
        lemma: fields[2].to_string(),
        pos_tag: fields[3].to_string(),
        features: Features::parse(fields[5]),
    };
    Ok(Some(token))
}

fn token_kind(id: &str) -> Option<TokenKind> {
    let bytes = id.as_bytes();
    if let Some(dash) = memchr::memchr(b'-', bytes) {
        atoi::atoi::<usize>(&bytes[..dash])?;
        atoi::atoi::<usize>(&bytes[dash + 1..])?;
        return Some(TokenKind::Range);
    }
    if let Some(dot) = memchr::memchr(b'.', bytes) {
        atoi::atoi::<usize>(&bytes[..dot])?;
        atoi::atoi::<usize>(&bytes[dot + 1..])?;
        return Some(TokenKind::Empty);
    }
    match atoi::atoi::<usize>(bytes) {
        Some(n) if n > 0 && bytes.iter().all(u8::is_ascii_digit) => Some(TokenKind::Word),
        _ => None,
    }
}
