//! Bounded per-scope conversation memory
//!
//! Prior batch request/response pairs are replayed to the provider as chat history
//! when the next chunk of the same scope is translated, which keeps terminology and
//! tone consistent across chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::TranslationItem;

/// Granularity at which conversation history is shared
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationScope {
    /// One conversation for the whole project
    Project,
    /// One conversation per file
    #[default]
    File,
    /// One conversation per file extension
    FileType,
}

/// Identifies one conversation
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Owning project
    pub project_id: String,
    /// Scope granularity
    pub scope: ConversationScope,
    /// File path or extension for narrower scopes; empty for project scope
    pub scope_value: String,
}

impl ConversationKey {
    /// Key of the conversation `item` belongs to
    pub fn for_item(project_id: &str, scope: ConversationScope, item: &TranslationItem) -> Self {
        let scope_value = match scope {
            ConversationScope::Project => String::new(),
            ConversationScope::File => item.metadata.file.clone(),
            ConversationScope::FileType => item.metadata.file_type(),
        };
        Self {
            project_id: project_id.to_string(),
            scope,
            scope_value,
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope {
            ConversationScope::Project => write!(f, "{}", self.project_id),
            ConversationScope::File => write!(f, "{}:file:{}", self.project_id, self.scope_value),
            ConversationScope::FileType => {
                write!(f, "{}:type:{}", self.project_id, self.scope_value)
            }
        }
    }
}

/// One request/response round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// User message sent to the provider
    pub request: String,
    /// Raw provider reply
    pub response: String,
    /// When the round completed
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time
    pub fn new(request: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Conversation {
    turns: VecDeque<ConversationTurn>,
    primed: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    conversations: HashMap<ConversationKey, Conversation>,
}

/// Shared conversation memory
///
/// Cloning is cheap; clones share state. History outlives individual batches
/// until [`clear`](Self::clear) is called. The round cap is supplied by the
/// caller on every [`append`](Self::append), so engines with different caps can
/// share one store without trimming each other's conversations.
#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    state: Arc<Mutex<StoreState>>,
}

impl ConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// History for `key`, oldest round first
    pub fn get(&self, key: &ConversationKey) -> Vec<ConversationTurn> {
        self.recent(key, usize::MAX)
    }

    /// The last `max_rounds` rounds for `key`, oldest first
    pub fn recent(&self, key: &ConversationKey, max_rounds: usize) -> Vec<ConversationTurn> {
        self.lock()
            .conversations
            .get(key)
            .map(|c| {
                let skip = c.turns.len().saturating_sub(max_rounds);
                c.turns.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Number of rounds kept for `key`
    pub fn len(&self, key: &ConversationKey) -> usize {
        self.lock()
            .conversations
            .get(key)
            .map_or(0, |c| c.turns.len())
    }

    /// True if no conversation holds any round
    pub fn is_empty(&self) -> bool {
        self.lock()
            .conversations
            .values()
            .all(|c| c.turns.is_empty())
    }

    /// Append a round, evicting this conversation's oldest rounds beyond `max_rounds`
    pub fn append(&self, key: &ConversationKey, turn: ConversationTurn, max_rounds: usize) {
        let cap = max_rounds.max(1);
        let mut state = self.lock();
        let conversation = state.conversations.entry(key.clone()).or_default();
        conversation.turns.push_back(turn);
        while conversation.turns.len() > cap {
            conversation.turns.pop_front();
        }
        tracing::debug!(
            conversation = %key,
            rounds = conversation.turns.len(),
            "Appended conversation round"
        );
    }

    /// True if priming samples were already sent in this conversation
    pub fn is_primed(&self, key: &ConversationKey) -> bool {
        self.lock()
            .conversations
            .get(key)
            .is_some_and(|c| c.primed)
    }

    /// Record that priming samples were sent in this conversation
    pub fn mark_primed(&self, key: &ConversationKey) {
        self.lock()
            .conversations
            .entry(key.clone())
            .or_default()
            .primed = true;
    }

    /// Forget one conversation, or all of them when `key` is None
    pub fn clear(&self, key: Option<&ConversationKey>) {
        let mut state = self.lock();
        match key {
            Some(key) => {
                state.conversations.remove(key);
            }
            None => state.conversations.clear(),
        }
    }

    /// Forget every conversation belonging to `project_id`
    pub fn clear_project(&self, project_id: &str) {
        self.lock()
            .conversations
            .retain(|key, _| key.project_id != project_id);
    }
}
