//! Cooperative pause/cancel coordination for the running batch operation
//!
//! Workers check [`OperationControl`] at suspension points (before each chunk or
//! item) and wrap provider calls in [`run_cancellable`](OperationControl::run_cancellable),
//! which races the call against a cancellation watcher so a slow request can be
//! abandoned promptly. A request already sent cannot be recalled; its result is
//! simply discarded.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ControlConfig;
use crate::error::{Error, Result};
use crate::types::{OperationPhase, OperationState};

/// Shared operation state plus the signals derived from it
///
/// Cloning is cheap; clones share state.
#[derive(Clone, Debug)]
pub struct OperationControl {
    in_progress: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    cancel_token: Arc<Mutex<CancellationToken>>,
    phase: Arc<Mutex<OperationPhase>>,
    last_failed_items: Arc<Mutex<Vec<String>>>,
    pause_poll_interval: Duration,
    cancel_poll_interval: Duration,
}

impl Default for OperationControl {
    fn default() -> Self {
        Self::new(&ControlConfig::default())
    }
}

impl OperationControl {
    /// Create an idle control
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            in_progress: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
            phase: Arc::new(Mutex::new(OperationPhase::Idle)),
            last_failed_items: Arc::new(Mutex::new(Vec::new())),
            pause_poll_interval: config.pause_poll_interval.max(Duration::from_millis(1)),
            cancel_poll_interval: config.cancel_poll_interval.max(Duration::from_millis(1)),
        }
    }

    fn set_phase(&self, phase: OperationPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn token(&self) -> CancellationToken {
        self.cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark a new operation as running with a fresh cancellation token
    pub fn begin(&self) {
        *self
            .cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.paused.store(false, Ordering::SeqCst);
        self.in_progress.store(true, Ordering::SeqCst);
        self.set_phase(OperationPhase::Running);
    }

    /// Mark the operation as finished in `phase`, remembering its failed item ids
    pub fn finish(&self, phase: OperationPhase, failed_items: Vec<String>) {
        self.in_progress.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.set_phase(phase);
        *self
            .last_failed_items
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failed_items;
    }

    /// Pause the running operation; returns false if nothing was running or it was already paused
    pub fn pause(&self) -> bool {
        if !self.in_progress.load(Ordering::SeqCst) || self.is_cancelled() {
            return false;
        }
        let changed = !self.paused.swap(true, Ordering::SeqCst);
        if changed {
            self.set_phase(OperationPhase::Paused);
        }
        changed
    }

    /// Resume a paused operation; returns false if it was not paused
    pub fn resume(&self) -> bool {
        let changed = self.paused.swap(false, Ordering::SeqCst);
        if changed && self.in_progress.load(Ordering::SeqCst) {
            self.set_phase(OperationPhase::Running);
        }
        changed
    }

    /// Request cancellation of the running operation
    ///
    /// Workers blocked in [`await_resumed`](Self::await_resumed) return immediately.
    pub fn cancel(&self) {
        self.token().cancel();
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Drop the in-progress flag without a cancellation request
    ///
    /// Workers treat a lost in-progress flag the same as cancellation.
    pub fn clear_in_progress(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// True once the operation has been cancelled or is no longer in progress
    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled() || !self.in_progress.load(Ordering::SeqCst)
    }

    /// True while the operation is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// True while an operation is running (paused or not)
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Wait while paused
    ///
    /// Returns `true` when work may continue, `false` if the operation was cancelled
    /// before or while waiting.
    pub async fn await_resumed(&self) -> bool {
        let token = self.token();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(self.pause_poll_interval) => {}
            }
        }
    }

    /// Resolves once the operation is cancelled or loses its in-progress flag
    pub async fn cancelled(&self) {
        let token = self.token();
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.cancel_poll_interval) => {}
            }
        }
    }

    /// Race `operation` against cancellation
    ///
    /// Returns [`Error::Cancelled`] if cancellation wins; the operation future is dropped.
    pub async fn run_cancellable<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => {
                tracing::debug!("In-flight request abandoned after cancellation");
                Err(Error::Cancelled)
            }
            result = operation => result,
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> OperationState {
        OperationState {
            is_in_progress: self.is_in_progress(),
            is_paused: self.is_paused(),
            phase: *self.phase.lock().unwrap_or_else(PoisonError::into_inner),
            last_failed_items: self
                .last_failed_items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Ids of items that failed in the last finished operation
    pub fn last_failed_items(&self) -> Vec<String> {
        self.last_failed_items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
