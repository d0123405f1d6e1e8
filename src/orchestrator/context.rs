//! Per-operation context -- resolved settings, outcome ledger and progress reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Orchestrator, ProgressFn};
use crate::config::EngineSettings;
use crate::error::{Error, ErrorKind};
use crate::provider::TranslationProvider;
use crate::retry::RetryPolicy;
use crate::types::{
    BatchFailure, BatchResult, BatchStatus, BatchSuccess, EngineId, Event, TranslationItem,
};

/// What happened to one item
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outcome {
    Translated(String),
    Failed { kind: ErrorKind, detail: String },
}

impl Outcome {
    pub(crate) fn from_error(error: &Error) -> Self {
        Outcome::Failed {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::from_error(&Error::Cancelled)
    }
}

/// State of one `translate_batch` call
///
/// Outcomes are collected by index and only written back to the caller's items in
/// [`finish`](Self::finish), so an abandoned request can never leave a half-applied
/// translation behind.
pub(crate) struct BatchContext<'a> {
    pub(super) orchestrator: &'a Orchestrator,
    pub(super) provider: Arc<dyn TranslationProvider>,
    pub(super) engine: &'a EngineId,
    pub(super) settings: EngineSettings,
    pub(super) source_lang: &'a str,
    pub(super) target_lang: &'a str,
    on_progress: Option<&'a ProgressFn<'a>>,
    total: usize,
    completed: AtomicUsize,
    ledger: Vec<Option<Outcome>>,
}

impl<'a> BatchContext<'a> {
    pub(super) fn new(
        orchestrator: &'a Orchestrator,
        provider: Arc<dyn TranslationProvider>,
        engine: &'a EngineId,
        settings: EngineSettings,
        (source_lang, target_lang): (&'a str, &'a str),
        total: usize,
        on_progress: Option<&'a ProgressFn<'a>>,
    ) -> Self {
        Self {
            orchestrator,
            provider,
            engine,
            settings,
            source_lang,
            target_lang,
            on_progress,
            total,
            completed: AtomicUsize::new(0),
            ledger: vec![None; total],
        }
    }

    /// Retry policy for one request of this operation
    pub(super) fn retry_policy(&self) -> RetryPolicy<'_> {
        let orchestrator = self.orchestrator;
        RetryPolicy::new(
            &orchestrator.config.retry,
            self.settings.attempts(),
            &orchestrator.rate_limiter,
            self.engine,
        )
        .with_events(&orchestrator.event_tx)
    }

    /// Record the outcome of `index`; an index is only ever recorded once
    pub(super) fn record(&mut self, index: usize, outcome: Outcome) {
        if let Some(slot) = self.ledger.get_mut(index) {
            if slot.is_none() {
                *slot = Some(outcome);
            }
        }
    }

    /// Fail every index that has no outcome yet with `error`
    pub(super) fn fail_unfinished(&mut self, error: &Error) {
        let outcome = Outcome::from_error(error);
        let mut failed = 0usize;
        for slot in self.ledger.iter_mut().filter(|slot| slot.is_none()) {
            *slot = Some(outcome.clone());
            failed += 1;
        }
        if failed > 0 {
            tracing::debug!(
                engine = %self.engine,
                items = failed,
                kind = %error.kind(),
                "Marked unfinished items as failed"
            );
        }
    }

    /// Report `units` more completed items
    pub(super) fn progress(&self, units: usize, message: &str) {
        let completed = self.completed.fetch_add(units, Ordering::SeqCst) + units;
        if let Some(on_progress) = self.on_progress {
            on_progress(completed, self.total, message);
        }
        self.orchestrator.emit_event(Event::Progress {
            completed,
            total: self.total,
            message: message.to_string(),
        });
    }

    /// Apply translations to `items` and build the result
    pub(super) fn finish(self, items: &mut [TranslationItem], status: BatchStatus) -> BatchResult {
        let mut successes = Vec::new();
        let mut failures = Vec::new();

        for (index, (item, slot)) in items.iter_mut().zip(self.ledger).enumerate() {
            match slot {
                Some(Outcome::Translated(text)) => {
                    item.apply_translation(text.clone());
                    successes.push(BatchSuccess {
                        index,
                        item: item.clone(),
                        translated_text: text,
                    });
                }
                Some(Outcome::Failed { kind, detail }) => failures.push(BatchFailure {
                    index,
                    item: item.clone(),
                    error_kind: kind,
                    detail,
                }),
                None => {
                    let kind = if status == BatchStatus::Cancelled {
                        ErrorKind::UserCancelled
                    } else {
                        ErrorKind::Other
                    };
                    failures.push(BatchFailure {
                        index,
                        item: item.clone(),
                        error_kind: kind,
                        detail: "item was not processed".to_string(),
                    });
                }
            }
        }

        BatchResult {
            status,
            successes,
            failures,
        }
    }
}
