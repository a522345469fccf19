//! Known part-of-speech categories per language
//!
//! Every language accepts the Universal Dependencies tags; a configuration
//! may register additional language-specific tags.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

/// The 17 Universal Dependencies POS tags
pub const UNIVERSAL_TAGS: &[&str] = &[
    "ADJ", "ADP", "ADV", "AUX", "CCONJ", "DET", "INTJ", "NOUN", "NUM", "PART", "PRON", "PROPN",
    "PUNCT", "SCONJ", "SYM", "VERB", "X",
];

#[derive(Debug, Clone, Default)]
pub struct Tagsets {
    extra: FxHashMap<String, FxHashSet<String>>,
}

impl Tagsets {
    pub fn universal() -> Self {
        Self::default()
    }

    pub fn from_config(tagsets: &BTreeMap<String, Vec<String>>) -> Self {
        let mut registry = Self::universal();
        for (language, tags) in tagsets {
            registry = registry.with_language(language, tags.iter().map(String::as_str));
        }
        registry
    }

    pub fn with_language<'a>(
        mut self,
        language: &str,
        tags: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.extra
            .entry(language.to_string())
            .or_default()
            .extend(tags.into_iter().map(str::to_string));
        self
    }

    pub fn is_known(&self, language: &str, tag: &str) -> bool {
        UNIVERSAL_TAGS.contains(&tag)
            || self
                .extra
                .get(language)
                .is_some_and(|tags| tags.contains(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universal_tags_for_any_language() {
        let tagsets = Tagsets::universal();
        assert!(tagsets.is_known("en", "NOUN"));
        assert!(tagsets.is_known("sl", "PROPN"));
        assert!(!tagsets.is_known("en", "NN"));
    }

    #[test]
    fn test_language_specific_tags() {
        let mut config = BTreeMap::new();
        config.insert("en".to_string(), vec!["NN".to_string(), "JJ".to_string()]);
        let tagsets = Tagsets::from_config(&config);

        assert!(tagsets.is_known("en", "NN"));
        assert!(!tagsets.is_known("de", "NN"));
    }
}
