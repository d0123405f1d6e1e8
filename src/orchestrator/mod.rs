//! Batch translation orchestrator split into focused submodules.
//!
//! The `Orchestrator` struct and its methods are organized by concern:
//! - [`context`] - Per-operation state, outcome ledger and progress reporting
//! - [`batch`] - Chunked path: one request per chunk with conversation memory
//! - [`single`] - Item path: bounded-concurrency single-item requests
//! - [`control`] - Operator control (pause/resume/cancel, state, cache clearing)

mod batch;
mod context;
mod control;
mod single;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::config::{Config, SettingsProvider};
use crate::control::OperationControl;
use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::provider::TranslationProvider;
use crate::rate_limiter::RateLimiter;
use crate::terminology::{NoTerminology, Terminology};
use crate::types::{
    BatchMode, BatchResult, BatchStatus, EngineId, Event, ItemStatus, TranslationItem,
};

use context::BatchContext;

/// Progress callback: `(completed, total, message)`
///
/// Invoked once per completed unit (chunk or item), never more.
pub type ProgressFn<'a> = dyn Fn(usize, usize, &str) + Send + Sync + 'a;

/// Registered translation engines
type ProviderRegistry = Arc<RwLock<HashMap<EngineId, Arc<dyn TranslationProvider>>>>;

/// Buffered events per subscriber before it starts lagging
const EVENT_BUFFER: usize = 1000;

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
///
/// Rate-limit state, conversation memory and operation state live here rather
/// than in globals, so independent instances never interfere.
#[derive(Clone)]
pub struct Orchestrator {
    /// Static configuration
    pub(crate) config: Arc<Config>,
    /// Per-engine settings source (defaults to `config`)
    pub(crate) settings: Arc<dyn SettingsProvider>,
    /// Term lookup used to enrich prompts
    pub(crate) terminology: Arc<dyn Terminology>,
    /// Engine id -> provider
    pub(crate) providers: ProviderRegistry,
    /// Per-engine request pacing and cooldowns
    pub(crate) rate_limiter: RateLimiter,
    /// Conversation history shared across batches
    pub(crate) conversations: ConversationStore,
    /// State of the current operation
    pub(crate) control: OperationControl,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// Engine settings are read from `config` until
    /// [`with_settings`](Self::with_settings) installs another source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);
        let config = Arc::new(config);

        Ok(Self {
            settings: config.clone(),
            terminology: Arc::new(NoTerminology),
            providers: Arc::new(RwLock::new(HashMap::new())),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            conversations: ConversationStore::new(),
            control: OperationControl::new(&config.control),
            event_tx,
            config,
        })
    }

    /// Read engine settings from `settings` instead of the static configuration
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    /// Enrich prompts with matches from `terminology`
    #[must_use]
    pub fn with_terminology(mut self, terminology: Arc<dyn Terminology>) -> Self {
        self.terminology = terminology;
        self
    }

    /// Register (or replace) the provider serving `engine`
    pub fn register_provider(
        &self,
        engine: impl Into<EngineId>,
        provider: Arc<dyn TranslationProvider>,
    ) {
        let engine = engine.into();
        tracing::debug!(
            engine = %engine,
            batch = provider.supports_batch(),
            "Registered translation provider"
        );
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(engine, provider);
    }

    pub(crate) fn provider(&self, engine: &EngineId) -> Result<Arc<dyn TranslationProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(engine)
            .cloned()
            .ok_or_else(|| Error::UnknownEngine(engine.to_string()))
    }

    /// Subscribe to orchestrator events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls more than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // Ignore send errors - no subscribers is fine
        self.event_tx.send(event).ok();
    }

    /// Static configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared conversation memory
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Shared rate limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Translate `items` with `engine`
    ///
    /// Batch-capable providers receive one request per chunk, sequentially, with
    /// conversation memory; other providers receive one request per item through the
    /// bounded executor. Successful translations are written to the items in place.
    ///
    /// The operation always returns a [`BatchResult`] covering every index exactly
    /// once, including when it is cancelled or aborted; per-item errors never surface
    /// as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEngine`] if no provider is registered for `engine`.
    /// No item is touched in that case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use batch_translator::{Config, EngineId, Orchestrator, TranslationItem};
    /// use batch_translator::provider::OpenAiProvider;
    /// use std::sync::Arc;
    ///
    /// # async fn example() -> batch_translator::Result<()> {
    /// let orchestrator = Orchestrator::new(Config::default())?;
    /// orchestrator.register_provider(
    ///     "openai",
    ///     Arc::new(OpenAiProvider::new("openai", "https://api.openai.com/v1")?),
    /// );
    ///
    /// let mut items = vec![TranslationItem::new("1", "Open file")];
    /// let result = orchestrator
    ///     .translate_batch(&mut items, "English", "German", &EngineId::new("openai"), None)
    ///     .await?;
    /// println!("{} translated, {} failed", result.successes.len(), result.failures.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn translate_batch(
        &self,
        items: &mut [TranslationItem],
        source_lang: &str,
        target_lang: &str,
        engine: &EngineId,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<BatchResult> {
        let provider = self.provider(engine)?;
        let settings = self.settings.engine_settings(engine).normalized();
        let mode = if provider.supports_batch() {
            BatchMode::Chunked
        } else {
            BatchMode::PerItem
        };

        if self.control.is_in_progress() {
            tracing::warn!(engine = %engine, "Starting a batch while another is still in progress");
        }
        self.control.begin();
        self.emit_event(Event::BatchStarted {
            engine: engine.clone(),
            total: items.len(),
            mode,
        });
        tracing::info!(
            engine = %engine,
            items = items.len(),
            mode = ?mode,
            "Batch translation started"
        );

        let mut ctx = BatchContext::new(
            self,
            provider,
            engine,
            settings,
            (source_lang, target_lang),
            items.len(),
            on_progress,
        );

        let status = if items.is_empty() {
            BatchStatus::Completed
        } else if ctx.provider.requires_api_key() && !ctx.settings.has_api_key() {
            tracing::error!(engine = %engine, "No API key configured, failing batch");
            ctx.fail_unfinished(&Error::Auth {
                engine: engine.to_string(),
                message: "no API key configured".to_string(),
            });
            BatchStatus::Failed
        } else {
            match mode {
                BatchMode::Chunked => ctx.translate_chunked(items).await,
                BatchMode::PerItem => ctx.translate_all_items(items).await,
            }
        };

        let result = ctx.finish(items, status);
        self.control.finish(status.into(), result.failed_ids());
        self.emit_event(Event::BatchFinished {
            status,
            succeeded: result.successes.len(),
            failed: result.failures.len(),
        });

        match status {
            BatchStatus::Completed => tracing::info!(
                engine = %engine,
                succeeded = result.successes.len(),
                failed = result.failures.len(),
                "Batch translation completed"
            ),
            BatchStatus::Cancelled => tracing::info!(
                engine = %engine,
                succeeded = result.successes.len(),
                failed = result.failures.len(),
                "Batch translation cancelled"
            ),
            BatchStatus::Failed => tracing::error!(
                engine = %engine,
                succeeded = result.successes.len(),
                failed = result.failures.len(),
                "Batch translation failed"
            ),
        }

        Ok(result)
    }

    /// Translate again the items that failed in the last operation
    ///
    /// Only items whose id is in [`last_failed_items`](crate::types::OperationState::last_failed_items)
    /// and that still have no translation are sent. Indices in the returned result
    /// refer to positions in `items`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEngine`] if no provider is registered for `engine`.
    pub async fn retry_failed(
        &self,
        items: &mut [TranslationItem],
        source_lang: &str,
        target_lang: &str,
        engine: &EngineId,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<BatchResult> {
        let failed: std::collections::HashSet<String> =
            self.control.last_failed_items().into_iter().collect();
        let positions: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                failed.contains(&item.id)
                    && item.status == ItemStatus::Pending
                    && item.target_text.trim().is_empty()
            })
            .map(|(index, _)| index)
            .collect();

        tracing::info!(
            engine = %engine,
            items = positions.len(),
            "Retrying previously failed items"
        );

        let mut subset: Vec<TranslationItem> = positions.iter().map(|&i| items[i].clone()).collect();
        let mut result = self
            .translate_batch(&mut subset, source_lang, target_lang, engine, on_progress)
            .await?;

        for (&position, item) in positions.iter().zip(subset) {
            items[position] = item;
        }
        for success in &mut result.successes {
            success.index = positions[success.index];
        }
        for failure in &mut result.failures {
            failure.index = positions[failure.index];
        }
        Ok(result)
    }
}
