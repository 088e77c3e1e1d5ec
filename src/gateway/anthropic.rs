//! Anthropic Messages API adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::http::{
    build_client, cap_content, check_input_size, header_value, send_capped, status_error,
};
use super::types::*;
use super::ChatProvider;

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// The Messages API requires `max_tokens`; used when the request leaves it unset.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AnthropicAdapter {
    pub fn from_env(timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::config("ANTHROPIC_API_KEY not set"))?;
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::with_config(api_key, base_url, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key: String = api_key.into();
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", header_value(&api_key, "API key")?);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let client = build_client(headers, timeout)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl ChatProvider for AnthropicAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        check_input_size(PROVIDER, req.total_chars())?;

        let start = Instant::now();

        let messages: Vec<ApiMessage<'_>> = req
            .conversation()
            .map(|m| ApiMessage {
                role: if m.role == Role::Assistant {
                    "assistant"
                } else {
                    "user"
                },
                content: &m.content,
            })
            .collect();
        if messages.is_empty() {
            return Err(ProviderError::invalid_request(PROVIDER, "No user message in request"));
        }

        let api_req = MessagesRequest {
            model: req.model.model_id(),
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: req.system_text(),
            messages,
            temperature: req.temperature,
        };

        let raw = send_capped(
            PROVIDER,
            self.client.post(self.messages_url()).json(&api_req),
            self.timeout,
        )
        .await?;

        if !(200..300).contains(&raw.status) {
            let (message, code) = match serde_json::from_str::<ErrorEnvelope>(&raw.body) {
                Ok(ErrorEnvelope { error: Some(e) }) => (e.message, e.error_type),
                _ => (None, None),
            };
            return Err(status_error(PROVIDER, raw, message, code));
        }

        let parsed: MessagesResponse = serde_json::from_str(&raw.body)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}"), false))?;

        // First text block is the answer.
        let content = parsed
            .content
            .into_iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text)
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content: cap_content(content),
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(parsed.stop_reason),
        })
    }
}
