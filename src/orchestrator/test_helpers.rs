//! Shared test helpers for creating Orchestrator instances with a scripted provider.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{Config, EngineSettings, RateLimitConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::provider::{BatchRequest, SingleRequest, TranslationProvider};
use crate::types::TranslationItem;

pub(crate) type ErrorFactory = fn() -> Error;

/// Scripted reply to one batch request
pub(crate) enum Reply {
    /// Translate every item with [`translated`]
    Echo,
    /// Return this body verbatim
    Raw(String),
    /// Fail the request
    Fail(ErrorFactory),
}

/// In-memory provider whose behaviour is scripted per test
#[derive(Default)]
pub(crate) struct MockProvider {
    batch: bool,
    delay: Duration,
    batch_replies: Mutex<VecDeque<Reply>>,
    /// source text -> (remaining failures, error)
    item_failures: Mutex<HashMap<String, (usize, ErrorFactory)>>,
    pub(crate) batch_requests: Mutex<Vec<BatchRequest>>,
    pub(crate) item_requests: Mutex<Vec<SingleRequest>>,
}

impl MockProvider {
    pub(crate) fn batch() -> Self {
        Self {
            batch: true,
            ..Default::default()
        }
    }

    pub(crate) fn per_item() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn push_batch_reply(&self, reply: Reply) {
        self.batch_replies.lock().unwrap().push_back(reply);
    }

    /// Fail single-item requests for `source` `times` times, then succeed
    pub(crate) fn fail_item(&self, source: &str, times: usize, error: ErrorFactory) {
        self.item_failures
            .lock()
            .unwrap()
            .insert(source.to_string(), (times, error));
    }

    pub(crate) fn batch_call_count(&self) -> usize {
        self.batch_requests.lock().unwrap().len()
    }

    pub(crate) fn item_call_count(&self) -> usize {
        self.item_requests.lock().unwrap().len()
    }
}

/// Translation the mock produces for `source`
pub(crate) fn translated(source: &str) -> String {
    format!("de:{source}")
}

#[async_trait]
impl TranslationProvider for MockProvider {
    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn translate_batch(
        &self,
        request: &BatchRequest,
        _settings: &EngineSettings,
    ) -> Result<String> {
        self.batch_requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self
            .batch_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Echo);
        match reply {
            Reply::Echo => {
                let translations: Vec<String> =
                    request.items.iter().map(|i| translated(&i.source)).collect();
                Ok(serde_json::json!({ "translations": translations }).to_string())
            }
            Reply::Raw(body) => Ok(body),
            Reply::Fail(error) => Err(error()),
        }
    }

    async fn translate_text(
        &self,
        request: &SingleRequest,
        _settings: &EngineSettings,
    ) -> Result<String> {
        self.item_requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = {
            let mut failures = self.item_failures.lock().unwrap();
            match failures.get_mut(&request.text) {
                Some((remaining, error)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*error)
                }
                _ => None,
            }
        };
        match failure {
            Some(error) => Err(error()),
            None => Ok(translated(&request.text)),
        }
    }
}

pub(crate) fn auth_error() -> Error {
    Error::Auth {
        engine: "mock".into(),
        message: "invalid api key".into(),
    }
}

pub(crate) fn timeout_error() -> Error {
    Error::Timeout("mock timed out".into())
}

/// Configuration with fast pacing, one attempt per request and an API key
pub(crate) fn test_config() -> Config {
    Config {
        project_id: "proj".into(),
        defaults: EngineSettings {
            api_key: "test-key".into(),
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
            initial_delay: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Orchestrator with `provider` registered as engine `mock`
pub(crate) fn create_test_orchestrator(config: Config, provider: Arc<MockProvider>) -> Orchestrator {
    let orchestrator = Orchestrator::new(config).unwrap();
    orchestrator.register_provider("mock", provider);
    orchestrator
}

/// `n` pending items with keys, all in `app.json`
pub(crate) fn sample_items(n: usize) -> Vec<TranslationItem> {
    (0..n)
        .map(|i| {
            TranslationItem::new(format!("item-{i}"), format!("Text {i}"))
                .with_key(format!("key.{i}"), "app.json")
        })
        .collect()
}
