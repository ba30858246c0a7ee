use crate::config::ApiConfig;
use crate::error::ChatError;
use crate::models::{ApiErrorBody, CompletionRequest, CompletionResponse, Message};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-call knobs; anything left `None` falls back to the defaults above.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// Trait defining the interface for chat completion providers
#[async_trait]
pub trait ChatApiProvider: Send + Sync {
    /// Sends `messages` as one completion request. A single attempt, no retry.
    async fn send_message(
        &self,
        messages: &[Message],
        options: &SendOptions,
    ) -> Result<CompletionResponse, ChatError>;
}

// --- OpenAI Compatible Provider Implementation ---

pub struct OpenAICompatibleProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAICompatibleProvider {
    pub fn new(config: &ApiConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, messages: &[Message], options: &SendOptions) -> CompletionRequest {
        CompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages: messages.to_vec(),
            temperature: Some(options.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            // Zero means "not set"
            max_tokens: options.max_tokens.filter(|n| *n > 0),
        }
    }
}

#[async_trait]
impl ChatApiProvider for OpenAICompatibleProvider {
    async fn send_message(
        &self,
        messages: &[Message],
        options: &SendOptions,
    ) -> Result<CompletionResponse, ChatError> {
        let request_body = self.build_request(messages, options);
        let request_url = self.url();
        log::info!(
            "Sending request to OpenAI compatible API: {} using model: {} ({} messages)",
            request_url,
            request_body.model,
            request_body.messages.len()
        );

        let response = self
            .client
            .post(&request_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                log::error!("Request to {} failed before a response: {:?}", request_url, e);
                ChatError::Transport(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            log::error!("OpenAI API request failed with status {}: {}", status, body);
            return Err(api_error(status, &body));
        }

        let completion: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            log::error!("Failed to parse completion response: {} - Body: {}", e, body);
            ChatError::Decode(e)
        })?;

        if let Some(usage) = completion.usage {
            log::debug!(
                "Completion {} used {} prompt + {} completion tokens",
                completion.id,
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        Ok(completion)
    }
}

// Prefer the server's own message; fall back to the raw body, then the status text
fn api_error(status: StatusCode, body: &str) -> ChatError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => ChatError::Api {
            status: status.as_u16(),
            message: parsed.error.message,
            kind: parsed.error.kind,
            code: parsed.error.code,
        },
        Err(_) => {
            let trimmed = body.trim();
            let message = if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                trimmed.to_string()
            };
            ChatError::Api {
                status: status.as_u16(),
                message,
                kind: None,
                code: None,
            }
        }
    }
}
