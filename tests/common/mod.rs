//! Common test utilities for batch-translator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use batch_translator::config::{RateLimitConfig, RetryConfig};
use batch_translator::provider::{BatchRequest, SingleRequest};
use batch_translator::{
    Config, EngineSettings, Error, Event, Orchestrator, Result, TranslationItem,
    TranslationProvider,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Engine id every scripted provider is registered under
pub const ENGINE: &str = "scripted";

/// What the provider does with one batch request
pub enum Step {
    /// Translate every item with [`fake_translation`]
    Translate,
    /// Reply with this body verbatim
    Body(String),
    /// Fail the request
    Fail(fn() -> Error),
}

/// Provider that follows a queue of scripted steps, then translates normally
pub struct ScriptedProvider {
    batch: bool,
    latency: Duration,
    steps: Mutex<VecDeque<Step>>,
    pub batch_sizes: Mutex<Vec<usize>>,
    pub history_lengths: Mutex<Vec<usize>>,
    pub single_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn batching() -> Self {
        Self::new(true)
    }

    pub fn per_item() -> Self {
        Self::new(false)
    }

    fn new(batch: bool) -> Self {
        Self {
            batch,
            latency: Duration::ZERO,
            steps: Mutex::new(VecDeque::new()),
            batch_sizes: Mutex::new(Vec::new()),
            history_lengths: Mutex::new(Vec::new()),
            single_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_sizes.lock().unwrap().len()
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }
}

/// Translation the scripted provider produces for `source`
pub fn fake_translation(source: &str) -> String {
    format!("[fr] {source}")
}

#[async_trait]
impl TranslationProvider for ScriptedProvider {
    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn translate_batch(
        &self,
        request: &BatchRequest,
        _settings: &EngineSettings,
    ) -> Result<String> {
        self.batch_sizes.lock().unwrap().push(request.items.len());
        self.history_lengths
            .lock()
            .unwrap()
            .push(request.history.len());
        tokio::time::sleep(self.latency).await;

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Translate);
        match step {
            Step::Translate => {
                let translations: Vec<String> = request
                    .items
                    .iter()
                    .map(|item| fake_translation(&item.source))
                    .collect();
                Ok(serde_json::json!({ "translations": translations }).to_string())
            }
            Step::Body(body) => Ok(body),
            Step::Fail(error) => Err(error()),
        }
    }

    async fn translate_text(
        &self,
        request: &SingleRequest,
        _settings: &EngineSettings,
    ) -> Result<String> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(fake_translation(&request.text))
    }
}

/// Fast configuration: high request rate, short backoff, single attempt
pub fn fast_config() -> Config {
    Config {
        project_id: "demo".to_string(),
        defaults: EngineSettings {
            api_key: "sk-test".to_string(),
            retry_count: 1,
            batch_max_items: 40,
            batch_max_chars: 100_000,
            ..Default::default()
        },
        rate_limit: RateLimitConfig {
            default_max_per_second: 1000.0,
            ..Default::default()
        },
        retry: RetryConfig {
            initial_delay: Duration::from_millis(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Orchestrator with `provider` registered as [`ENGINE`]
pub fn orchestrator_with(config: Config, provider: Arc<ScriptedProvider>) -> Orchestrator {
    let orchestrator = Orchestrator::new(config).expect("valid test config");
    orchestrator.register_provider(ENGINE, provider);
    orchestrator
}

/// `n` items spread over two files
pub fn items(n: usize) -> Vec<TranslationItem> {
    (0..n)
        .map(|i| {
            let file = if i % 2 == 0 { "menu.json" } else { "dialog.json" };
            TranslationItem::new(format!("id-{i}"), format!("Entry number {i}"))
                .with_key(format!("entry.{i}"), file)
        })
        .collect()
}

/// Drain every event currently buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
