//! HTTP plumbing shared by the vendor adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use super::error::{ErrorContext, ProviderError};

/// Maximum allowed response body length (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
pub(crate) const MAX_INPUT_CHARS: usize = 500_000;

/// Fixed backoff hint when a provider answers 429 without Retry-After.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

pub(crate) fn build_client(
    mut headers: HeaderMap,
    timeout: Duration,
) -> Result<reqwest::Client, ProviderError> {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn header_value(value: &str, what: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value)
        .map_err(|_| ProviderError::config(format!("Invalid {what} format")))
}

/// Raw response read under the size limit.
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
    pub context: ErrorContext,
    pub retry_after: Option<Duration>,
}

/// Send a request and stream the body, enforcing [`MAX_RESPONSE_LEN`].
pub(crate) async fn send_capped(
    provider: &'static str,
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<RawResponse, ProviderError> {
    let mut response = request
        .send()
        .await
        .map_err(|e| map_transport(provider, e, timeout))?;

    let status = response.status().as_u16();
    let request_id = extract_request_id(response.headers());
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| map_transport(provider, e, timeout))?
    {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(RawResponse {
        status,
        body: String::from_utf8_lossy(&bytes).to_string(),
        context: ErrorContext::from_status(status).request_id(request_id),
        retry_after,
    })
}

/// Classify a non-2xx response.
pub(crate) fn status_error(
    provider: &'static str,
    raw: RawResponse,
    message: Option<String>,
    code: Option<String>,
) -> ProviderError {
    let ctx = raw.context.code(code);
    match raw.status {
        429 => ProviderError::rate_limited(
            provider,
            raw.retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            ctx,
        ),
        400 | 404 | 422 => ProviderError::InvalidRequest {
            provider,
            message: message.unwrap_or_else(|| format!("HTTP {}", raw.status)),
            context: Some(ctx),
        },
        // Any 5xx is transient, including Anthropic's 529 "overloaded".
        status => ProviderError::Provider {
            provider,
            message: message.unwrap_or_else(|| format!("HTTP {status}")),
            retryable: status >= 500,
            context: Some(ctx),
        },
    }
}

pub(crate) fn check_input_size(
    provider: &'static str,
    total_chars: usize,
) -> Result<(), ProviderError> {
    if total_chars > MAX_INPUT_CHARS {
        return Err(ProviderError::invalid_request(provider, format!(
            "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
        )));
    }
    Ok(())
}

/// Truncate on a char boundary at or below [`MAX_RESPONSE_LEN`].
pub(crate) fn cap_content(mut content: String) -> String {
    if content.len() > MAX_RESPONSE_LEN {
        let mut end = MAX_RESPONSE_LEN;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        content.truncate(end);
    }
    content
}

fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .or_else(|| headers.get("request-id"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn map_transport(provider: &'static str, err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider,
            elapsed: timeout,
        }
    } else {
        ProviderError::Http(err)
    }
}
