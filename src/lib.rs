//! # batch-translator
//!
//! Orchestration engine for translating large collections of short texts through
//! pluggable machine-translation and LLM providers.
//!
//! ## Design Philosophy
//!
//! batch-translator is designed to be:
//! - **Resilient** - Rate limiting, cooldowns and retries are built in per engine
//! - **Interruptible** - Pause, resume or cancel at any point without losing finished work
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use batch_translator::provider::OpenAiProvider;
//! use batch_translator::{Config, EngineId, EngineSettings, Orchestrator, TranslationItem};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         project_id: "my-app".to_string(),
//!         defaults: EngineSettings {
//!             api_key: std::env::var("OPENAI_API_KEY")?,
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let orchestrator = Orchestrator::new(config)?;
//!     orchestrator.register_provider(
//!         "openai",
//!         Arc::new(OpenAiProvider::new("openai", "https://api.openai.com/v1")?),
//!     );
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut items = vec![
//!         TranslationItem::new("1", "Open file").with_key("menu.open", "menu.json"),
//!         TranslationItem::new("2", "Save as...").with_key("menu.save_as", "menu.json"),
//!     ];
//!     let result = orchestrator
//!         .translate_batch(&mut items, "English", "German", &EngineId::new("openai"), None)
//!         .await?;
//!
//!     println!("{} translated, {} failed", result.successes.len(), result.failures.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch chunking by item count and character budget
pub mod chunker;
/// Configuration types
pub mod config;
/// Cooperative pause/cancel coordination
pub mod control;
/// Per-scope conversation memory
pub mod conversation;
/// Error types
pub mod error;
/// Bounded-concurrency executor
pub mod executor;
/// Batch translation orchestrator (decomposed into focused submodules)
pub mod orchestrator;
/// Provider contract and the OpenAI-compatible provider
pub mod provider;
/// Post-translation quality checks
pub mod quality;
/// Per-engine rate limiting with overload cooldowns
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Terminology lookup
pub mod terminology;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, EngineOverrides, EngineSettings, PrimingSample, SettingsProvider};
pub use conversation::{ConversationKey, ConversationScope, ConversationStore};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{Orchestrator, ProgressFn};
pub use provider::{TranslationProvider, parse_batch_response};
pub use quality::{QualityIssue, QualityIssueKind, QualityReport};
pub use terminology::{Glossary, NoTerminology, TermMatch, Terminology};
pub use types::{
    BatchFailure, BatchMode, BatchResult, BatchStatus, BatchSuccess, EngineId, Event, ItemMetadata,
    ItemStatus, OperationPhase, OperationState, TranslationItem,
};
