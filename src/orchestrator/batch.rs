//! Chunked path -- one batch request per chunk, sequential, with conversation memory.

use std::collections::HashSet;

use super::context::{BatchContext, Outcome};
use crate::chunker::{self, Chunk};
use crate::conversation::{ConversationKey, ConversationTurn};
use crate::error::{Error, ErrorKind, Result};
use crate::provider::{BatchRequest, BatchRequestItem, parse_batch_response, prompt};
use crate::retry::with_retry;
use crate::terminology::TermMatch;
use crate::types::{BatchStatus, Event, TranslationItem};

impl BatchContext<'_> {
    /// Translate `items` chunk by chunk
    ///
    /// Chunks run strictly in order because they share conversation state. A chunk
    /// whose response stays malformed after retries is translated item by item
    /// instead; any other exhausted error aborts the remaining chunks.
    pub(super) async fn translate_chunked(&mut self, items: &[TranslationItem]) -> BatchStatus {
        let orchestrator = self.orchestrator;
        let chunks = chunker::chunk(
            items,
            self.settings.batch_max_chars,
            self.settings.batch_max_items,
        );
        let count = chunks.len();

        tracing::debug!(
            engine = %self.engine,
            items = items.len(),
            chunks = count,
            "Split batch into chunks"
        );

        for (n, chunk) in chunks.iter().enumerate() {
            if !orchestrator.control.await_resumed().await {
                tracing::info!(engine = %self.engine, chunk = n, "Cancelled before chunk");
                self.fail_unfinished(&Error::Cancelled);
                return BatchStatus::Cancelled;
            }

            let result = self.translate_chunk(items, chunk).await;
            match result {
                Ok(translations) => {
                    let translated = translations.len();
                    for (&index, text) in chunk.indices.iter().zip(translations) {
                        self.record(index, Outcome::Translated(text));
                    }
                    orchestrator.emit_event(Event::ChunkCompleted {
                        chunk: n,
                        chunks: count,
                        translated,
                    });
                    self.progress(chunk.len(), &format!("Translated chunk {}/{count}", n + 1));
                }
                Err(Error::Cancelled) => {
                    tracing::info!(engine = %self.engine, chunk = n, "Cancelled during chunk");
                    self.fail_unfinished(&Error::Cancelled);
                    return BatchStatus::Cancelled;
                }
                Err(e) if e.kind() == ErrorKind::Protocol => {
                    tracing::warn!(
                        engine = %self.engine,
                        chunk = n,
                        error = %e,
                        "Batch response rejected, translating chunk item by item"
                    );
                    orchestrator.emit_event(Event::ChunkFallback {
                        chunk: n,
                        reason: e.to_string(),
                    });
                    if let Some(status) = self.translate_items(items, &chunk.indices).await {
                        return status;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        engine = %self.engine,
                        chunk = n,
                        error = %e,
                        "Chunk failed, aborting remaining chunks"
                    );
                    self.fail_unfinished(&e);
                    return BatchStatus::Failed;
                }
            }
        }

        BatchStatus::Completed
    }

    /// Send one chunk and return its validated translations
    async fn translate_chunk(&self, items: &[TranslationItem], chunk: &Chunk) -> Result<Vec<String>> {
        let orchestrator = self.orchestrator;
        let settings = &self.settings;
        let chunk_items: Vec<&TranslationItem> =
            chunk.indices.iter().filter_map(|&i| items.get(i)).collect();
        let Some(first) = chunk_items.first() else {
            return Ok(Vec::new());
        };

        // The chunk's first item decides which conversation it continues. A chunk
        // that spans several files (or file types) reads and extends only that
        // conversation; chunks are not split at scope boundaries.
        let key = ConversationKey::for_item(
            &orchestrator.config.project_id,
            settings.conversation_scope,
            first,
        );
        let remember = settings.conversation_enabled;
        let history = if remember {
            orchestrator
                .conversations
                .recent(&key, settings.conversation_max_rounds)
        } else {
            Vec::new()
        };
        let already_primed = remember && orchestrator.conversations.is_primed(&key);
        let priming_message = if settings.priming_enabled && !already_primed {
            prompt::priming_message(&settings.priming_samples)
        } else {
            None
        };

        let terms = self.chunk_terms(&chunk_items);
        let request = BatchRequest {
            model: settings.model.clone(),
            system_prompt: prompt::batch_system_prompt(self.source_lang, self.target_lang, &terms),
            history,
            priming_message,
            items: chunk_items
                .iter()
                .map(|item| BatchRequestItem::from(*item))
                .collect(),
        };

        tracing::debug!(
            engine = %self.engine,
            conversation = %key,
            items = request.items.len(),
            history = request.history.len(),
            terms = terms.len(),
            "Sending batch request"
        );

        let policy = self.retry_policy();
        let provider = self.provider.as_ref();
        let expected = chunk.len();
        let request_ref = &request;
        let (body, translations) = orchestrator
            .control
            .run_cancellable(with_retry(&policy, || async move {
                let body = provider.translate_batch(request_ref, settings).await?;
                let translations = parse_batch_response(&body, expected)?;
                Ok::<_, Error>((body, translations))
            }))
            .await?;

        if remember {
            orchestrator
                .conversations
                .append(
                    &key,
                    ConversationTurn::new(request.user_message(), body),
                    settings.conversation_max_rounds,
                );
            if request.priming_message.is_some() {
                orchestrator.conversations.mark_primed(&key);
            }
        }

        Ok(translations)
    }

    /// Terminology matches across all items of a chunk, without duplicates
    fn chunk_terms(&self, chunk_items: &[&TranslationItem]) -> Vec<TermMatch> {
        let mut seen = HashSet::new();
        chunk_items
            .iter()
            .flat_map(|item| self.orchestrator.terminology.find_matches(&item.source_text))
            .filter(|term| seen.insert(term.source.to_lowercase()))
            .collect()
    }
}
