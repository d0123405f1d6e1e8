//! Operator control -- pause, resume, cancel, state snapshot and cache clearing.

use super::Orchestrator;
use crate::conversation::ConversationKey;
use crate::types::{EngineId, Event, OperationState};

impl Orchestrator {
    /// Pause the running operation
    ///
    /// Workers finish the request they are in and then wait before the next chunk or
    /// item. Nothing is cancelled. Returns `false` if no operation is running or it is
    /// already paused.
    pub fn pause(&self) -> bool {
        if !self.control.pause() {
            return false;
        }
        tracing::info!("Batch operation paused");
        self.emit_event(Event::Paused);
        true
    }

    /// Resume a paused operation
    ///
    /// Returns `false` if the operation was not paused.
    pub fn resume(&self) -> bool {
        if !self.control.resume() {
            return false;
        }
        tracing::info!("Batch operation resumed");
        self.emit_event(Event::Resumed);
        true
    }

    /// Cancel the running operation
    ///
    /// The in-flight request is abandoned and its result discarded. Items completed
    /// before this call stay translated; every other item is reported as
    /// [`UserCancelled`](crate::error::ErrorKind::UserCancelled).
    pub fn cancel(&self) {
        if !self.control.is_in_progress() {
            tracing::debug!("Cancel requested with no operation in progress");
            return;
        }
        tracing::info!("Batch operation cancellation requested");
        self.control.cancel();
    }

    /// Snapshot of the current (or last) operation
    pub fn operation_state(&self) -> OperationState {
        self.control.state()
    }

    /// Forget conversation history for `key`, or for every conversation if `None`
    pub fn clear_conversations(&self, key: Option<&ConversationKey>) {
        match key {
            Some(key) => tracing::debug!(conversation = %key, "Clearing conversation"),
            None => tracing::debug!("Clearing all conversations"),
        }
        self.conversations.clear(key);
    }

    /// Drop pacing and cooldown state for `engine`
    pub fn clear_rate_limit(&self, engine: &EngineId) {
        tracing::debug!(engine = %engine, "Clearing rate limit state");
        self.rate_limiter.clear(engine);
    }
}
