//! Provider for OpenAI-compatible chat-completion endpoints

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{BatchRequest, SingleRequest, TranslationProvider};
use crate::config::EngineSettings;
use crate::error::{Error, Result};

/// Longest response body quoted in error messages
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Batch-capable provider speaking the `/chat/completions` protocol
///
/// Conversation history is replayed as alternating user/assistant messages and
/// batch requests ask for a JSON object response.
///
/// # Examples
///
/// ```no_run
/// use batch_translator::provider::OpenAiProvider;
///
/// let provider = OpenAiProvider::new("openai", "https://api.openai.com/v1")?;
/// # Ok::<(), batch_translator::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct OpenAiProvider {
    name: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider for the API rooted at `base_url`
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid base URL {base_url}: {e}"), "base_url"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| Error::config(format!("invalid base URL {base_url}: {e}"), "base_url"))?;

        Ok(Self {
            name: name.into(),
            endpoint,
            client: reqwest::Client::new(),
        })
    }

    /// Endpoint requests are posted to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn complete(
        &self,
        settings: &EngineSettings,
        messages: &[ChatMessage<'_>],
        json_mode: bool,
    ) -> Result<String> {
        let mut body = json!({
            "model": settings.model,
            "temperature": settings.temperature,
            "messages": messages,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        tracing::debug!(
            engine = %self.name,
            endpoint = %self.endpoint,
            messages = messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(settings.api_key.trim())
            .timeout(settings.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(&self.name, status, &headers, &text));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("unparseable chat completion: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Protocol("chat completion has no content".to_string()))
    }

    fn map_transport_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout(format!("{} request timed out: {error}", self.name))
        } else {
            Error::Network(error)
        }
    }
}

#[async_trait]
impl TranslationProvider for OpenAiProvider {
    fn supports_batch(&self) -> bool {
        true
    }

    async fn translate_batch(
        &self,
        request: &BatchRequest,
        settings: &EngineSettings,
    ) -> Result<String> {
        let user_message = request.user_message();
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 3);
        messages.push(ChatMessage {
            role: "system",
            content: &request.system_prompt,
        });
        for turn in &request.history {
            messages.push(ChatMessage {
                role: "user",
                content: &turn.request,
            });
            messages.push(ChatMessage {
                role: "assistant",
                content: &turn.response,
            });
        }
        if let Some(priming) = &request.priming_message {
            messages.push(ChatMessage {
                role: "user",
                content: priming,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &user_message,
        });

        self.complete(settings, &messages, true).await
    }

    async fn translate_text(
        &self,
        request: &SingleRequest,
        settings: &EngineSettings,
    ) -> Result<String> {
        let messages = [
            ChatMessage {
                role: "system",
                content: &request.system_prompt,
            },
            ChatMessage {
                role: "user",
                content: &request.text,
            },
        ];
        let reply = self.complete(settings, &messages, false).await?;
        Ok(reply.trim().to_string())
    }
}

/// Map a non-success HTTP status onto the error taxonomy
pub(crate) fn map_status(engine: &str, status: StatusCode, headers: &HeaderMap, body: &str) -> Error {
    let message: String = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("no reason").to_string()
    } else {
        body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth {
            engine: engine.to_string(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
            engine: engine.to_string(),
            retry_after: retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Error::Timeout(format!("{engine} returned HTTP {}", status.as_u16()))
        }
        _ => Error::Provider {
            status: status.as_u16(),
            message,
        },
    }
}

/// `Retry-After` in delta-seconds form
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
