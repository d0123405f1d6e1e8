//! Configuration types for batch-translator

use crate::conversation::ConversationScope;
use crate::error::{Error, Result};
use crate::rate_limiter::{MIN_MAX_PER_SECOND, is_valid_rate};
use crate::types::EngineId;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

/// Upper bound for `retry_count`
pub const MAX_RETRY_COUNT: u32 = 10;

/// Upper bound for `concurrency_limit`
pub const MAX_CONCURRENCY: usize = 32;

/// A reference-only sample shown to the provider once per conversation
///
/// Priming samples teach the provider the project's key-naming conventions.
/// They are never translated themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimingSample {
    /// Stable key of the sample entry
    pub key: String,
    /// Source text of the sample entry
    pub source_text: String,
    /// File the sample was taken from
    #[serde(default)]
    pub file: String,
}

/// Per-engine settings, as exposed by the settings store
///
/// Values are read per call through [`SettingsProvider`]; use
/// [`normalized`](Self::normalized) before acting on them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineSettings {
    /// API key (empty = not configured)
    #[serde(default)]
    pub api_key: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (default: 0.3)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds (default: 60)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Maximum concurrent single-item requests (default: 4, clamped to 1..=32)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Attempts per request (default: 3, clamped to 0..=10; 0 still makes one attempt)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Maximum items per batch request (default: 40)
    #[serde(default = "default_batch_max_items")]
    pub batch_max_items: usize,

    /// Character budget per batch request (default: 6000)
    #[serde(default = "default_batch_max_chars")]
    pub batch_max_chars: usize,

    /// Keep prior request/response turns across chunks (default: true)
    #[serde(default = "default_true")]
    pub conversation_enabled: bool,

    /// Granularity at which turns are remembered (default: file)
    #[serde(default)]
    pub conversation_scope: ConversationScope,

    /// Number of rounds kept per conversation (default: 8)
    #[serde(default = "default_conversation_max_rounds")]
    pub conversation_max_rounds: usize,

    /// Inject priming samples once per conversation (default: false)
    #[serde(default)]
    pub priming_enabled: bool,

    /// Samples injected when priming is enabled
    #[serde(default)]
    pub priming_samples: Vec<PrimingSample>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
            concurrency_limit: default_concurrency_limit(),
            retry_count: default_retry_count(),
            batch_max_items: default_batch_max_items(),
            batch_max_chars: default_batch_max_chars(),
            conversation_enabled: true,
            conversation_scope: ConversationScope::default(),
            conversation_max_rounds: default_conversation_max_rounds(),
            priming_enabled: false,
            priming_samples: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Clamp numeric settings into their supported ranges
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.retry_count = self.retry_count.min(MAX_RETRY_COUNT);
        self.concurrency_limit = self.concurrency_limit.clamp(1, MAX_CONCURRENCY);
        self.batch_max_items = self.batch_max_items.max(1);
        self.conversation_max_rounds = self.conversation_max_rounds.max(1);
        self.timeout_seconds = self.timeout_seconds.max(1);
        self
    }

    /// Request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Number of attempts the retry policy makes (at least one)
    pub fn attempts(&self) -> u32 {
        self.retry_count.min(MAX_RETRY_COUNT).max(1)
    }

    /// True if an API key has been configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Per-engine settings override
///
/// Every field is optional; fields left unset fall back to [`Config::defaults`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOverrides {
    /// API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Per-request timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Maximum concurrent single-item requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,
    /// Attempts per request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Maximum items per batch request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_max_items: Option<usize>,
    /// Character budget per batch request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_max_chars: Option<usize>,
    /// Keep prior request/response turns across chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_enabled: Option<bool>,
    /// Granularity at which turns are remembered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_scope: Option<ConversationScope>,
    /// Number of rounds kept per conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_max_rounds: Option<usize>,
    /// Inject priming samples once per conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priming_enabled: Option<bool>,
    /// Samples injected when priming is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priming_samples: Option<Vec<PrimingSample>>,
}

impl EngineOverrides {
    /// Layer the fields set here over `base`
    pub fn apply(&self, mut base: EngineSettings) -> EngineSettings {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut base.api_key, &self.api_key);
        set(&mut base.model, &self.model);
        set(&mut base.temperature, &self.temperature);
        set(&mut base.timeout_seconds, &self.timeout_seconds);
        set(&mut base.concurrency_limit, &self.concurrency_limit);
        set(&mut base.retry_count, &self.retry_count);
        set(&mut base.batch_max_items, &self.batch_max_items);
        set(&mut base.batch_max_chars, &self.batch_max_chars);
        set(&mut base.conversation_enabled, &self.conversation_enabled);
        set(&mut base.conversation_scope, &self.conversation_scope);
        set(&mut base.conversation_max_rounds, &self.conversation_max_rounds);
        set(&mut base.priming_enabled, &self.priming_enabled);
        set(&mut base.priming_samples, &self.priming_samples);
        base
    }
}

/// Source of per-engine settings
///
/// The orchestrator reads settings at the start of every batch so changes made
/// in the settings store between batches take effect without a restart.
pub trait SettingsProvider: Send + Sync {
    /// Settings for the given engine
    fn engine_settings(&self, engine: &EngineId) -> EngineSettings;
}

/// Retry backoff configuration
///
/// The number of attempts comes from [`EngineSettings::retry_count`]; this only
/// shapes the delay between attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 512 seconds)
    ///
    /// The default leaves `initial_delay * 2^attempt` uncapped for every attempt
    /// allowed by [`MAX_RETRY_COUNT`].
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Per-engine request rate configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second when no engine override exists (default: 5.0)
    #[serde(default = "default_max_per_second")]
    pub default_max_per_second: f64,

    /// Per-engine overrides keyed by engine id
    #[serde(default)]
    pub per_engine: HashMap<String, f64>,

    /// Minimum pause after an overload signal (default: 5 seconds)
    #[serde(default = "default_cooldown", with = "duration_ms_serde")]
    pub default_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_max_per_second: default_max_per_second(),
            per_engine: HashMap::new(),
            default_cooldown: default_cooldown(),
        }
    }
}

impl RateLimitConfig {
    /// Requests per second for an engine
    pub fn max_per_second(&self, engine: &EngineId) -> f64 {
        self.per_engine
            .get(engine.as_str())
            .copied()
            .unwrap_or(self.default_max_per_second)
    }
}

/// Pause/cancel polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlConfig {
    /// How often a paused worker re-checks the pause flag (default: 100 ms)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub pause_poll_interval: Duration,

    /// How often an in-flight request checks for cancellation (default: 100 ms)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub cancel_poll_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pause_poll_interval: default_poll_interval(),
            cancel_poll_interval: default_poll_interval(),
        }
    }
}

/// Main configuration for the orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Project the conversations belong to
    #[serde(default)]
    pub project_id: String,

    /// Settings used for engines without an override
    #[serde(default)]
    pub defaults: EngineSettings,

    /// Per-engine overrides keyed by engine id, layered over `defaults`
    #[serde(default)]
    pub engines: HashMap<String, EngineOverrides>,

    /// Request rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pause/cancel polling
    #[serde(default)]
    pub control: ControlConfig,

    /// Bounded executor yields to the scheduler after this many items per worker (default: 20)
    #[serde(default = "default_yield_every")]
    pub executor_yield_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            defaults: EngineSettings::default(),
            engines: HashMap::new(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            control: ControlConfig::default(),
            executor_yield_every: default_yield_every(),
        }
    }
}

impl SettingsProvider for Config {
    fn engine_settings(&self, engine: &EngineId) -> EngineSettings {
        match self.engines.get(engine.as_str()) {
            Some(overrides) => overrides.apply(self.defaults.clone()),
            None => self.defaults.clone(),
        }
    }
}

impl Config {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject settings the orchestrator cannot act on
    pub fn validate(&self) -> Result<()> {
        if !is_valid_rate(self.rate_limit.default_max_per_second) {
            return Err(Error::config(
                format!("requests per second must be a finite value of at least {MIN_MAX_PER_SECOND}"),
                "rate_limit.default_max_per_second",
            ));
        }
        if let Some((engine, _)) = self
            .rate_limit
            .per_engine
            .iter()
            .find(|(_, rate)| !is_valid_rate(**rate))
        {
            return Err(Error::config(
                format!(
                    "requests per second for engine {engine} must be a finite value of at least {MIN_MAX_PER_SECOND}"
                ),
                "rate_limit.per_engine",
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::config(
                "backoff multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        let overrides = self
            .engines
            .iter()
            .map(|(name, overrides)| (name.as_str(), overrides.apply(self.defaults.clone())));
        for (name, settings) in std::iter::once(("defaults", self.defaults.clone())).chain(overrides) {
            if settings.batch_max_chars == 0 {
                return Err(Error::config(
                    format!("batch_max_chars for {name} must be non-zero"),
                    "batch_max_chars",
                ));
            }
            if settings.batch_max_items == 0 {
                return Err(Error::config(
                    format!("batch_max_items for {name} must be non-zero"),
                    "batch_max_items",
                ));
            }
        }
        Ok(())
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_retry_count() -> u32 {
    3
}

fn default_batch_max_items() -> usize {
    40
}

fn default_batch_max_chars() -> usize {
    6000
}

fn default_true() -> bool {
    true
}

fn default_conversation_max_rounds() -> usize {
    8
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(512)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_per_second() -> f64 {
    5.0
}

fn default_cooldown() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_yield_every() -> usize {
    20
}

// Duration serialization helper (integer milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
