//! Item path -- one request per item through the bounded executor.

use std::sync::OnceLock;

use super::context::{BatchContext, Outcome};
use crate::error::{Error, ErrorKind};
use crate::executor::run_bounded_with_yield;
use crate::provider::{SingleRequest, prompt};
use crate::retry::with_retry;
use crate::types::{BatchStatus, TranslationItem};

impl BatchContext<'_> {
    /// Translate every item individually
    pub(super) async fn translate_all_items(&mut self, items: &[TranslationItem]) -> BatchStatus {
        let indices: Vec<usize> = (0..items.len()).collect();
        self.translate_items(items, &indices)
            .await
            .unwrap_or(BatchStatus::Completed)
    }

    /// Translate `items[i]` for every `i` in `indices`
    ///
    /// Individual failures are recorded and do not stop the other items. Returns a
    /// terminal status if the operation must end here: `Cancelled` after operator
    /// cancellation, `Failed` after an auth failure. In both cases every unfinished
    /// item of the whole batch has been failed already.
    pub(super) async fn translate_items(
        &mut self,
        items: &[TranslationItem],
        indices: &[usize],
    ) -> Option<BatchStatus> {
        let auth_failure = OnceLock::new();
        let outcomes = {
            let this = &*self;
            let auth_failure = &auth_failure;
            run_bounded_with_yield(
                indices,
                self.settings.concurrency_limit,
                self.orchestrator.config.executor_yield_every,
                |&index, _| async move {
                    match items.get(index) {
                        Some(item) => this.translate_one(item, auth_failure).await,
                        None => Outcome::Failed {
                            kind: ErrorKind::Other,
                            detail: format!("no item at index {index}"),
                        },
                    }
                },
            )
            .await
        };

        for (&index, outcome) in indices.iter().zip(outcomes) {
            self.record(index, outcome);
        }

        if self.orchestrator.control.is_cancelled() {
            self.fail_unfinished(&Error::Cancelled);
            return Some(BatchStatus::Cancelled);
        }
        if let Some(detail) = auth_failure.into_inner() {
            tracing::error!(
                engine = %self.engine,
                error = %detail,
                "Authentication failed, aborting remaining items"
            );
            self.fail_unfinished(&Error::Auth {
                engine: self.engine.to_string(),
                message: detail,
            });
            return Some(BatchStatus::Failed);
        }
        None
    }

    async fn translate_one(&self, item: &TranslationItem, auth_failure: &OnceLock<String>) -> Outcome {
        let orchestrator = self.orchestrator;
        if !orchestrator.control.await_resumed().await {
            return Outcome::cancelled();
        }
        if let Some(detail) = auth_failure.get() {
            return Outcome::Failed {
                kind: ErrorKind::Auth,
                detail: detail.clone(),
            };
        }

        let terms = orchestrator.terminology.find_matches(&item.source_text);
        let request = SingleRequest {
            model: self.settings.model.clone(),
            system_prompt: prompt::item_system_prompt(
                self.source_lang,
                self.target_lang,
                item,
                &terms,
            ),
            text: item.source_text.clone(),
        };

        let policy = self.retry_policy();
        let provider = self.provider.as_ref();
        let settings = &self.settings;
        let request = &request;
        let result = orchestrator
            .control
            .run_cancellable(with_retry(&policy, || {
                provider.translate_text(request, settings)
            }))
            .await;

        let outcome = match result {
            Ok(text) => Outcome::Translated(text),
            Err(Error::Cancelled) => return Outcome::cancelled(),
            Err(e) => {
                if e.is_auth_failure() {
                    auth_failure.set(e.to_string()).ok();
                } else {
                    tracing::warn!(
                        engine = %self.engine,
                        item = %item.id,
                        error = %e,
                        "Item translation failed"
                    );
                }
                Outcome::from_error(&e)
            }
        };

        self.progress(1, "Translating items");
        outcome
    }
}
