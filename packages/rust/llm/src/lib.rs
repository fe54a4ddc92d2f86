//! Minimal OpenAI-compatible chat-completion client.
//!
//! Treats the completion API as an opaque text-in/text-out capability: the
//! only contract is a valid UTF-8 text response. Both the Ranker and the
//! Summarizer go through this client.

mod error;
mod types;

pub use error::{LlmError, Result};
pub use types::{ChatRequest, ChatResponse, Message, Usage};

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

/// Per-request timeout. Summaries of long papers can take a while.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Chat-completion API client.
#[derive(Clone)]
pub struct ChatClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl ChatClient {
    /// Create a new client for the given base URL (e.g., `https://api.deepseek.com`).
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send messages to the chat-completion endpoint and return the first
    /// choice's content.
    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "completion request failed");
                LlmError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "completion API error");
            return Err(LlmError::Api(format!("HTTP {status}: {error_text}")));
        }

        let raw: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let usage = raw.usage.clone();
        let content = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Api("response contained no choices".into()))?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            "chat completion"
        );

        Ok(ChatResponse { content, usage })
    }
}
