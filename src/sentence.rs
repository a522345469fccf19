//! Tagged sentence data structures
//!
//! A `TaggedSentence` is the unit of input for the engine: an ordered
//! sequence of lemmatized, POS-tagged tokens plus a stable identifier and a
//! content hash over the tagged token sequence. The hash is what the
//! analysis cache is keyed on.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Stable identifier of a sentence within the corpus
pub type SentenceId = u64;

/// Morphological features (Case, Number, Gender, ...), kept sorted so the
/// content hash is independent of input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features(BTreeMap<String, String>);

impl Features {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a `Key=Value|Key=Value` feature string; `_` is empty
    pub fn parse(s: &str) -> Self {
        let mut feats = Features::new();
        if s == "_" || s.is_empty() {
            return feats;
        }
        for pair in s.split('|') {
            if let Some((key, value)) = pair.split_once('=') {
                feats.insert(key, value);
            }
        }
        feats
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Features {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A single tagged token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub surface_form: String,
    pub lemma: String,
    pub pos_tag: String,
    #[serde(default)]
    pub features: Features,
}

impl Token {
    pub fn new(surface_form: &str, lemma: &str, pos_tag: &str) -> Self {
        Self {
            surface_form: surface_form.to_string(),
            lemma: lemma.to_string(),
            pos_tag: pos_tag.to_string(),
            features: Features::new(),
        }
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }
}

/// SHA-256 of a tagged token sequence
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of_tokens(tokens: &[Token]) -> Self {
        let mut hasher = Sha256::new();
        for token in tokens {
            hasher.update(token.surface_form.as_bytes());
            hasher.update([0x1f]);
            hasher.update(token.lemma.as_bytes());
            hasher.update([0x1f]);
            hasher.update(token.pos_tag.as_bytes());
            for (key, value) in token.features.iter() {
                hasher.update([0x1f]);
                hasher.update(key.as_bytes());
                hasher.update([b'=']);
                hasher.update(value.as_bytes());
            }
            hasher.update([0x1e]);
        }
        ContentHash(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

/// Why a sentence was excluded from counting
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SkipReason {
    #[error("token {position} has no lemma")]
    MissingLemma { position: usize },

    #[error("token {position} has no POS tag")]
    MissingPos { position: usize },

    #[error("malformed input: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSentence {
    pub sentence_id: SentenceId,
    pub reason: SkipReason,
}

/// One sentence of the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedSentence {
    pub sentence_id: SentenceId,
    pub tokens: Vec<Token>,
    pub content_hash: ContentHash,
    /// Plain text of the sentence, if the source carried it
    #[serde(default)]
    pub text: Option<String>,
    /// Aligned sentence on the other side of a parallel corpus
    #[serde(default)]
    pub aligned_text: Option<String>,
}

impl TaggedSentence {
    /// Create a sentence and compute its content hash
    pub fn new(sentence_id: SentenceId, tokens: Vec<Token>) -> Self {
        let content_hash = ContentHash::of_tokens(&tokens);
        Self {
            sentence_id,
            tokens,
            content_hash,
            text: None,
            aligned_text: None,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Check that every token carries the tag data the matcher relies on
    pub fn validate(&self) -> Result<(), SkipReason> {
        for (position, token) in self.tokens.iter().enumerate() {
            if is_blank(&token.lemma) {
                return Err(SkipReason::MissingLemma { position });
            }
            if is_blank(&token.pos_tag) {
                return Err(SkipReason::MissingPos { position });
            }
        }
        Ok(())
    }
}

fn is_blank(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s == "_"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(id: SentenceId) -> TaggedSentence {
        TaggedSentence::new(
            id,
            vec![
                Token::new("big", "big", "ADJ"),
                Token::new("houses", "house", "NOUN")
                    .with_features(Features::parse("Number=Plur|Case=Nom")),
            ],
        )
    }

    #[test]
    fn test_content_hash_ignores_sentence_id() {
        assert_eq!(sentence(1).content_hash, sentence(2).content_hash);
    }

    #[test]
    fn test_content_hash_sees_features() {
        let a = sentence(1);
        let mut tokens = a.tokens.clone();
        tokens[1].features.insert("Case", "Acc");
        let b = TaggedSentence::new(1, tokens);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_feature_order_is_canonical() {
        let a = Features::parse("Number=Plur|Case=Nom");
        let b = Features::parse("Case=Nom|Number=Plur");
        assert_eq!(a, b);
        assert_eq!(a.get("Case"), Some("Nom"));
        assert!(Features::parse("_").is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(sentence(1).validate().is_ok());

        let bad = TaggedSentence::new(3, vec![Token::new("x", "x", "NOUN"), Token::new("y", "_", "X")]);
        assert_eq!(bad.validate(), Err(SkipReason::MissingLemma { position: 1 }));

        let bad = TaggedSentence::new(4, vec![Token::new("x", "x", "")]);
        assert_eq!(bad.validate(), Err(SkipReason::MissingPos { position: 0 }));
    }

    #[test]
    fn test_hex_display() {
        let hash = sentence(1).content_hash;
        assert_eq!(hash.to_string().len(), 64);
    }
}
