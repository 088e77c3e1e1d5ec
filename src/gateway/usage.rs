//! Per-attempt usage records emitted by [`ProviderGateway`](super::ProviderGateway).
//!
//! The CLI logs them with [`TracingUsageSink`]; tests use [`NoopUsageSink`] or
//! [`CountingUsageSink`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One attempt against a vendor endpoint, successful or not.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// "openai", "anthropic" or "gemini".
    pub provider: &'static str,
    pub model: String,
    /// Code path that issued the call ("adapter::ask", "extract::assisted").
    pub caller: &'static str,
    pub refresh_id: Option<Uuid>,
    /// 0-based attempt within the gateway retry loop.
    pub attempt: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    /// [`ProviderError::code`](super::ProviderError::code) of a failed attempt.
    pub error_code: Option<&'static str>,
    pub at: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Must not fail the call being recorded.
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Emits one `debug` event per attempt under the `rankwatch::usage` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        tracing::debug!(
            target: "rankwatch::usage",
            provider = record.provider,
            model = %record.model,
            caller = record.caller,
            refresh_id = ?record.refresh_id,
            attempt = record.attempt,
            tokens = record.input_tokens + record.output_tokens,
            latency_ms = record.latency_ms,
            error_code = record.error_code.unwrap_or("-"),
            "provider call"
        );
    }
}

/// Call and failure counts per model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub calls: u32,
    pub failures: u32,
    pub tokens: u64,
}

/// In-memory tally keyed by model id.
#[derive(Debug, Default)]
pub struct CountingUsageSink {
    counts: Mutex<BTreeMap<String, CallCounts>>,
}

impl CountingUsageSink {
    pub fn snapshot(&self) -> BTreeMap<String, CallCounts> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl UsageSink for CountingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        let mut counts = self
            .counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = counts.entry(record.model).or_default();
        entry.calls += 1;
        if record.error_code.is_some() {
            entry.failures += 1;
        }
        entry.tokens += u64::from(record.input_tokens) + u64::from(record.output_tokens);
    }
}
