//! Core types and events for batch-translator

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ErrorKind;

/// Identifier of a translation provider
///
/// Engine ids are free-form strings (`"openai"`, `"deepl"`, ...) so new providers
/// can be registered without touching this crate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Create a new EngineId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EngineId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EngineId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Review state of a translation item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// No translation yet
    #[default]
    Pending,
    /// Machine translated
    Translated,
    /// Edited by a person
    Edited,
    /// Approved by a reviewer
    Approved,
}

/// Structured context attached to an item by the parser that produced it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Stable key of the entry within its file (e.g. `menu.file.open`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// File the entry belongs to
    #[serde(default)]
    pub file: String,
    /// Free-form hints for the translator (comments, max length, screen name)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl ItemMetadata {
    /// File extension used as the file-type scope (lowercased, without dot)
    pub fn file_type(&self) -> String {
        std::path::Path::new(&self.file)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }
}

/// A single translatable text
///
/// Items are owned by the caller; a successful translation writes
/// `target_text` and sets `status` to [`ItemStatus::Translated`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationItem {
    /// Caller-assigned identity
    pub id: String,
    /// Text to translate
    pub source_text: String,
    /// Current translation (empty until translated)
    #[serde(default)]
    pub target_text: String,
    /// Review state
    #[serde(default)]
    pub status: ItemStatus,
    /// Parser-supplied context
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl TranslationItem {
    /// Create a pending item
    pub fn new(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            target_text: String::new(),
            status: ItemStatus::Pending,
            metadata: ItemMetadata::default(),
        }
    }

    /// Attach a key and owning file
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, file: impl Into<String>) -> Self {
        self.metadata.key = Some(key.into());
        self.metadata.file = file.into();
        self
    }

    /// Key length counted against the batch character budget
    pub fn key_len(&self) -> usize {
        self.metadata
            .key
            .as_deref()
            .map_or(0, |key| key.chars().count())
    }

    pub(crate) fn apply_translation(&mut self, text: String) {
        self.target_text = text;
        self.status = ItemStatus::Translated;
    }
}

/// How a batch is dispatched to the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Chunks of items per request, sequential, with conversation memory
    Chunked,
    /// One request per item through the bounded executor
    PerItem,
}

/// A successfully translated item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSuccess {
    /// Position in the input slice
    pub index: usize,
    /// Item after the translation was applied
    pub item: TranslationItem,
    /// Text returned by the provider
    pub translated_text: String,
}

/// An item that was not translated
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Position in the input slice
    pub index: usize,
    /// Item as it was left (unchanged)
    pub item: TranslationItem,
    /// Failure category
    pub error_kind: ErrorKind,
    /// Human-readable detail
    pub detail: String,
}

/// Terminal state of a batch operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every item was processed (individual items may still have failed)
    Completed,
    /// The operator stopped the operation
    Cancelled,
    /// An unrecoverable error aborted the remaining items
    Failed,
}

/// Outcome of a batch operation
///
/// Every input index appears exactly once across `successes` and `failures`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Terminal state
    pub status: BatchStatus,
    /// Items translated, sorted by index
    pub successes: Vec<BatchSuccess>,
    /// Items not translated, sorted by index
    pub failures: Vec<BatchFailure>,
}

impl BatchResult {
    /// Total number of items covered
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// True if the batch was empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all failed items
    pub fn failed_ids(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.item.id.clone()).collect()
    }

    /// Check that every index in `0..total` appears exactly once
    pub fn covers_exactly(&self, total: usize) -> bool {
        if self.len() != total {
            return false;
        }
        let mut seen = HashSet::with_capacity(total);
        self.successes
            .iter()
            .map(|s| s.index)
            .chain(self.failures.iter().map(|f| f.index))
            .all(|index| index < total && seen.insert(index))
    }
}

/// Lifecycle phase of the orchestrator's current operation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    /// No operation has run yet
    #[default]
    Idle,
    /// An operation is making progress
    Running,
    /// An operation is waiting for `resume()`
    Paused,
    /// The last operation processed every item
    Completed,
    /// The last operation was cancelled
    Cancelled,
    /// The last operation aborted on an unrecoverable error
    Failed,
}

impl From<BatchStatus> for OperationPhase {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => OperationPhase::Completed,
            BatchStatus::Cancelled => OperationPhase::Cancelled,
            BatchStatus::Failed => OperationPhase::Failed,
        }
    }
}

/// Snapshot of the orchestrator's operation state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    /// An operation is running (possibly paused)
    pub is_in_progress: bool,
    /// The running operation is paused
    pub is_paused: bool,
    /// Current or last phase
    pub phase: OperationPhase,
    /// Ids of items that failed in the last finished operation
    pub last_failed_items: Vec<String>,
}

/// Event emitted during a batch operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch operation started
    BatchStarted {
        /// Engine handling the batch
        engine: EngineId,
        /// Number of items
        total: usize,
        /// Dispatch mode
        mode: BatchMode,
    },

    /// A chunk was translated and merged
    ChunkCompleted {
        /// Zero-based chunk index
        chunk: usize,
        /// Number of chunks in the batch
        chunks: usize,
        /// Items translated in this chunk
        translated: usize,
    },

    /// A chunk's batch response was unusable; its items are retried one by one
    ChunkFallback {
        /// Zero-based chunk index
        chunk: usize,
        /// Why the batch response was rejected
        reason: String,
    },

    /// Completed-unit progress
    Progress {
        /// Items finished (translated or failed)
        completed: usize,
        /// Items in the batch
        total: usize,
        /// Human-readable phase message
        message: String,
    },

    /// The operation was paused
    Paused,

    /// The operation was resumed
    Resumed,

    /// A provider signalled overload and a cooldown was applied
    Overloaded {
        /// Engine that is cooling down
        engine: EngineId,
        /// Cooldown length in milliseconds
        cooldown_ms: u64,
    },

    /// The operation reached a terminal state
    BatchFinished {
        /// Terminal state
        status: BatchStatus,
        /// Items translated
        succeeded: usize,
        /// Items not translated
        failed: usize,
    },
}
