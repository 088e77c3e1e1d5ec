//! Provider gateway for chat completions across the OpenAI, Anthropic and Gemini APIs.

pub mod anthropic;
pub mod error;
pub mod gemini;
mod http;
pub mod openai;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use chrono::Utc;

use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use anthropic::AnthropicAdapter;
pub use error::{ErrorContext, ProviderError};
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use types::*;
pub use usage::{CallCounts, CountingUsageSink, NoopUsageSink, TracingUsageSink, UsageSink};

/// Trait for a single vendor's chat endpoint. One implementation per vendor API.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// What the rest of the crate talks to: a provider with retries and usage tracking.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    provider: Arc<dyn ChatProvider>,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn with_config(
        provider: Arc<dyn ChatProvider>,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    /// Build a gateway for `backend` with credentials from the environment.
    pub fn from_env(
        backend: Backend,
        timeout: Duration,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Result<Self, ProviderError> {
        let provider: Arc<dyn ChatProvider> = match backend {
            Backend::OpenAi => Arc::new(OpenAiAdapter::from_env(timeout)?),
            Backend::Anthropic => Arc::new(AnthropicAdapter::from_env(timeout)?),
            Backend::Gemini => Arc::new(GeminiAdapter::from_env(timeout)?),
        };
        Ok(Self::with_config(provider, usage_sink, config))
    }

    /// Call the provider, retrying retryable errors up to `max_retries` times.
    /// Every attempt is reported to the usage sink.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            let result = self.provider.chat(&req).await;
            self.record_usage(&req, attempt, &result).await;

            let err = match result {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = backoff_delay(self.config.retry_base_delay, attempt);
            tracing::debug!(
                provider = self.provider.name(),
                model = req.model.model_id(),
                attempt,
                http_status = ?err.http_status(),
                error = %err,
                "retrying provider call in {delay:?}"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        attempt: u32,
        result: &Result<ChatResponse, ProviderError>,
    ) {
        let (input_tokens, output_tokens, latency_ms, error_code) = match result {
            Ok(resp) => (
                resp.input_tokens,
                resp.output_tokens,
                resp.latency.as_millis() as u64,
                None,
            ),
            Err(err) => (0, 0, 0, Some(err.code())),
        };
        self.usage_sink
            .record(ProviderCallRecord {
                provider: req.model.provider(),
                model: req.model.model_id().to_string(),
                caller: req.attribution.caller,
                refresh_id: req.attribution.refresh_id,
                attempt,
                input_tokens,
                output_tokens,
                latency_ms,
                error_code,
                at: Utc::now(),
            })
            .await;
    }
}

pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}
