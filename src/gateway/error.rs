//! Transport errors shared by the OpenAI, Anthropic and Gemini adapters.

use std::time::Duration;
use thiserror::Error;

/// What the vendor told us about a failed call.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// Vendor error code or status string (`rate_limit_exceeded`, `RESOURCE_EXHAUSTED`).
    pub provider_code: Option<String>,
    /// `x-request-id` / `request-id` response header.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn from_status(status: u16) -> Self {
        Self {
            http_status: Some(status),
            ..Self::default()
        }
    }

    pub fn code(mut self, code: Option<String>) -> Self {
        if code.is_some() {
            self.provider_code = code;
        }
        self
    }

    pub fn request_id(mut self, id: Option<String>) -> Self {
        if id.is_some() {
            self.request_id = id;
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429. Retryable.
    #[error("rate limited by {provider}, retry after {retry_after:?}")]
    RateLimited {
        provider: &'static str,
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// Rejected request (bad model id, malformed body, oversized input). Never retried.
    #[error("{provider} rejected request: {message}")]
    InvalidRequest {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Any other vendor-side failure; 5xx responses are retryable.
    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    #[error("{provider} timed out after {elapsed:?}")]
    Timeout {
        provider: &'static str,
        elapsed: Duration,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing credentials or an unbuildable client.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn rate_limited(
        provider: &'static str,
        retry_after: Duration,
        context: ErrorContext,
    ) -> Self {
        Self::RateLimited {
            provider,
            retry_after,
            context: Some(context),
        }
    }

    pub fn invalid_request(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            provider,
            message: message.into(),
            context: None,
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest { .. } | Self::Config(_) => false,
        }
    }

    /// Short code for usage records and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Provider { .. } => "provider_error",
            Self::Timeout { .. } => "timeout",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. }
            | Self::InvalidRequest { context, .. }
            | Self::Provider { context, .. } => context.as_ref(),
            Self::Timeout { .. } | Self::Http(_) | Self::Config(_) => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        self.context().and_then(|c| c.http_status)
    }
}
