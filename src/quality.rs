//! Post-translation quality checks
//!
//! [`evaluate`] inspects translated items for mechanical defects that a reviewer
//! would otherwise have to catch by eye. Checks run through the bounded executor,
//! so large projects are processed with a fixed concurrency ceiling.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::executor::run_bounded;
use crate::terminology::Terminology;
use crate::types::TranslationItem;

/// Category of a quality issue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    /// The item has no translation
    EmptyTranslation,
    /// The translation is identical to the source text
    Untranslated,
    /// Format placeholders differ between source and translation
    PlaceholderMismatch,
    /// Leading or trailing whitespace differs
    WhitespaceMismatch,
    /// A glossary term was not rendered as required
    TerminologyViolation,
}

/// A single finding
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Issue category
    pub kind: QualityIssueKind,
    /// Human-readable description
    pub message: String,
}

impl QualityIssue {
    fn new(kind: QualityIssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Findings for one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Position in the evaluated slice
    pub index: usize,
    /// Id of the evaluated item
    pub item_id: String,
    /// Issues found (empty if the item passed)
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    /// True if no issue was found
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{[A-Za-z0-9_]*\}|%(?:\d+\$)?[sd]").ok())
        .as_ref()
}

/// Placeholders in `text`, sorted
fn placeholders(text: &str) -> Vec<&str> {
    let Some(pattern) = placeholder_pattern() else {
        return Vec::new();
    };
    let mut found: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
    found.sort_unstable();
    found
}

fn leading_ws(text: &str) -> &str {
    &text[..text.len() - text.trim_start().len()]
}

fn trailing_ws(text: &str) -> &str {
    &text[text.trim_end().len()..]
}

/// Run every check against one item
pub fn check_item(item: &TranslationItem, terminology: &dyn Terminology) -> Vec<QualityIssue> {
    let source = item.source_text.as_str();
    let target = item.target_text.as_str();

    if target.trim().is_empty() {
        if source.trim().is_empty() {
            return Vec::new();
        }
        return vec![QualityIssue::new(
            QualityIssueKind::EmptyTranslation,
            "translation is empty",
        )];
    }

    let mut issues = Vec::new();

    if source.trim() == target.trim() && source.chars().any(char::is_alphabetic) {
        issues.push(QualityIssue::new(
            QualityIssueKind::Untranslated,
            "translation is identical to the source text",
        ));
    }

    let expected = placeholders(source);
    let actual = placeholders(target);
    if expected != actual {
        issues.push(QualityIssue::new(
            QualityIssueKind::PlaceholderMismatch,
            format!("placeholders {expected:?} became {actual:?}"),
        ));
    }

    if leading_ws(source) != leading_ws(target) || trailing_ws(source) != trailing_ws(target) {
        issues.push(QualityIssue::new(
            QualityIssueKind::WhitespaceMismatch,
            "leading or trailing whitespace differs from the source text",
        ));
    }

    let target_lower = target.to_lowercase();
    for term in terminology.find_matches(source) {
        if !target_lower.contains(&term.target.to_lowercase()) {
            issues.push(QualityIssue::new(
                QualityIssueKind::TerminologyViolation,
                format!("\"{}\" should be translated as \"{}\"", term.source, term.target),
            ));
        }
    }

    issues
}

/// Check every item with at most `concurrency` checks in flight
///
/// `reports[i]` always describes `items[i]`.
pub async fn evaluate(
    items: &[TranslationItem],
    terminology: &dyn Terminology,
    concurrency: usize,
) -> Vec<QualityReport> {
    let reports = run_bounded(items, concurrency, |item, index| async move {
        QualityReport {
            index,
            item_id: item.id.clone(),
            issues: check_item(item, terminology),
        }
    })
    .await;

    let flagged = reports.iter().filter(|r| !r.passed()).count();
    tracing::debug!(items = items.len(), flagged, "Quality check finished");
    reports
}
