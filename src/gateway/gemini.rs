//! Google Gemini `generateContent` adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::http::{
    build_client, cap_content, check_input_size, header_value, send_capped, status_error,
};
use super::types::*;
use super::ChatProvider;

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiAdapter {
    pub fn from_env(timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ProviderError::config("GEMINI_API_KEY not set"))?;
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::with_config(api_key, base_url, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key: String = api_key.into();
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", header_value(&api_key, "API key")?);
        let client = build_client(headers, timeout)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(String::from),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

#[async_trait]
impl ChatProvider for GeminiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        check_input_size(PROVIDER, req.total_chars())?;

        let start = Instant::now();

        let contents: Vec<Content> = req
            .conversation()
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                text_content(Some(role), &m.content)
            })
            .collect();
        if contents.is_empty() {
            return Err(ProviderError::invalid_request(PROVIDER, "No user message in request"));
        }

        let generation_config = if req.temperature.is_some() || req.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_tokens,
            })
        } else {
            None
        };

        let api_req = GenerateRequest {
            system_instruction: req.system_text().map(|s| text_content(None, &s)),
            contents,
            generation_config,
        };

        let raw = send_capped(
            PROVIDER,
            self.client
                .post(self.generate_url(req.model.model_id()))
                .json(&api_req),
            self.timeout,
        )
        .await?;

        if !(200..300).contains(&raw.status) {
            let (message, code) = match serde_json::from_str::<ErrorEnvelope>(&raw.body) {
                Ok(ErrorEnvelope { error: Some(e) }) => (e.message, e.status),
                _ => (None, None),
            };
            return Err(status_error(PROVIDER, raw, message, code));
        }

        let parsed: GenerateResponse = serde_json::from_str(&raw.body)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}"), false))?;

        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider(PROVIDER, "No candidates in response", false))?;

        let content: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage_metadata
            .map(|u| {
                (
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content: cap_content(content),
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(candidate.finish_reason),
        })
    }
}
