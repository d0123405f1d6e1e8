//! Terminology lookup used to enrich prompts and check translations

use serde::{Deserialize, Serialize};

/// A glossary entry found in a text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermMatch {
    /// Term in the source language
    pub source: String,
    /// Required rendering in the target language
    pub target: String,
}

/// Source of required term renderings
pub trait Terminology: Send + Sync {
    /// Entries whose source term occurs in `text`
    fn find_matches(&self, text: &str) -> Vec<TermMatch>;
}

/// Terminology source that never matches
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTerminology;

impl Terminology for NoTerminology {
    fn find_matches(&self, _text: &str) -> Vec<TermMatch> {
        Vec::new()
    }
}

/// In-memory glossary with case-insensitive substring matching
///
/// Longer source terms are reported first so that "Save As" wins over "Save"
/// when both are present.
#[derive(Clone, Debug, Default)]
pub struct Glossary {
    entries: Vec<(String, TermMatch)>,
}

impl Glossary {
    /// Create an empty glossary
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub fn insert(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        if source.trim().is_empty() {
            return;
        }
        self.entries
            .retain(|(_, entry)| !entry.source.eq_ignore_ascii_case(&source));
        self.entries
            .push((source.to_lowercase(), TermMatch { source, target }));
        self.entries
            .sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for Glossary {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut glossary = Glossary::new();
        for (source, target) in iter {
            glossary.insert(source, target);
        }
        glossary
    }
}

impl Terminology for Glossary {
    fn find_matches(&self, text: &str) -> Vec<TermMatch> {
        let haystack = text.to_lowercase();
        self.entries
            .iter()
            .filter(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}
