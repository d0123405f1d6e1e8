//! Provider contract: request/response shapes every translation engine speaks
//!
//! A provider is anything that can turn a [`SingleRequest`] into text. Providers
//! that also accept a [`BatchRequest`] (many items, one structured JSON reply)
//! report [`supports_batch`](TranslationProvider::supports_batch) and are driven
//! chunk-by-chunk with conversation memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::conversation::ConversationTurn;
use crate::error::{Error, Result};
use crate::types::TranslationItem;

pub mod openai;
pub mod prompt;

pub use openai::OpenAiProvider;

/// One item inside a batch request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestItem {
    /// Stable key, if the item has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Text to translate
    pub source: String,
    /// Owning file
    pub file: String,
    /// Owning file's extension
    pub file_type: String,
}

impl From<&TranslationItem> for BatchRequestItem {
    fn from(item: &TranslationItem) -> Self {
        Self {
            key: item.metadata.key.clone(),
            source: item.source_text.clone(),
            file: item.metadata.file.clone(),
            file_type: item.metadata.file_type(),
        }
    }
}

/// A chunk of items sent as one request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Model identifier
    pub model: String,
    /// Instructions, including the required response shape
    pub system_prompt: String,
    /// Prior rounds of the same conversation, oldest first
    pub history: Vec<ConversationTurn>,
    /// Reference-only samples, present only on a conversation's first request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priming_message: Option<String>,
    /// Items to translate, in chunk order
    pub items: Vec<BatchRequestItem>,
}

impl BatchRequest {
    /// The user message carrying the items, as recorded in conversation history
    pub fn user_message(&self) -> String {
        #[derive(Serialize)]
        struct Payload<'a> {
            items: &'a [BatchRequestItem],
        }
        serde_json::to_string(&Payload { items: &self.items })
            .unwrap_or_else(|_| String::from("{\"items\":[]}"))
    }
}

/// A single text sent as one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRequest {
    /// Model identifier
    pub model: String,
    /// Instructions plus item context
    pub system_prompt: String,
    /// Text to translate
    pub text: String,
}

/// A translation engine
///
/// Implementations map transport failures onto the crate's [`Error`] taxonomy:
/// bad credentials as [`Error::Auth`], throttling as [`Error::RateLimited`],
/// timeouts as [`Error::Timeout`].
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// True if [`translate_batch`](Self::translate_batch) is implemented
    fn supports_batch(&self) -> bool {
        false
    }

    /// True if requests cannot succeed without an API key
    fn requires_api_key(&self) -> bool {
        true
    }

    /// Send a batch request and return the raw response body
    ///
    /// The body is validated by [`parse_batch_response`].
    async fn translate_batch(
        &self,
        _request: &BatchRequest,
        _settings: &EngineSettings,
    ) -> Result<String> {
        Err(Error::Protocol(
            "provider does not support batch requests".to_string(),
        ))
    }

    /// Translate one text and return the provider's reply
    async fn translate_text(
        &self,
        request: &SingleRequest,
        settings: &EngineSettings,
    ) -> Result<String>;
}

/// Validate a batch response body and extract its translations
///
/// The body must be a JSON object with a `translations` array of strings whose
/// length equals `expected`. Surrounding whitespace and one enclosing markdown
/// code fence are tolerated; anything else is an [`Error::Protocol`].
///
/// # Examples
///
/// ```
/// use batch_translator::provider::parse_batch_response;
///
/// let body = r#"{"translations": ["Hallo", "Welt"]}"#;
/// assert_eq!(parse_batch_response(body, 2).unwrap(), vec!["Hallo", "Welt"]);
/// assert!(parse_batch_response(body, 3).is_err());
/// ```
pub fn parse_batch_response(body: &str, expected: usize) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    struct BatchResponse {
        translations: Vec<String>,
    }

    let json = strip_code_fence(body.trim());
    let parsed: BatchResponse = serde_json::from_str(json)
        .map_err(|e| Error::Protocol(format!("unparseable batch response: {e}")))?;

    if parsed.translations.len() != expected {
        return Err(Error::Protocol(format!(
            "expected {expected} translations, got {}",
            parsed.translations.len()
        )));
    }
    Ok(parsed.translations)
}

fn strip_code_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return body;
    };
    // drop the info string (e.g. "json") on the opening fence line
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}
