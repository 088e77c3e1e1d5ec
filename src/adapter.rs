//! Provider adapter: one probe question in, one answer (or a typed failure) out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::gateway::{Attribution, Backend, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::probe_messages;
use crate::providers::ProviderSpec;

/// Per-call probe failure. Always contained to the one question it belongs to.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("provider call failed: {0}")]
    ProviderCallFailed(#[from] ProviderError),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// Send a single probe to a named model and return its answer text.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn ask(&self, model: &str, question: &str) -> Result<String, ProbeError>;

    /// [`ask`](Self::ask) on behalf of a refresh. Adapters that report usage
    /// override this to tag the call with `refresh_id`.
    async fn ask_in_refresh(
        &self,
        _refresh_id: Uuid,
        model: &str,
        question: &str,
    ) -> Result<String, ProbeError> {
        self.ask(model, question).await
    }
}

/// [`ProviderAdapter`] over a [`ChatGateway`] for one vendor backend.
///
/// The instruction preamble is fixed at construction and sent as the system
/// message of every probe. Each call is bounded by `timeout` on top of the
/// gateway's own transport timeout and retries.
#[derive(Clone)]
pub struct GatewayAdapter {
    gateway: Arc<dyn ChatGateway>,
    backend: Backend,
    preamble: String,
    timeout: Duration,
    attribution: Attribution,
}

impl GatewayAdapter {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        backend: Backend,
        preamble: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            backend,
            preamble: preamble.into(),
            timeout,
            attribution: Attribution::new("adapter::ask"),
        }
    }

    pub fn for_provider(
        gateway: Arc<dyn ChatGateway>,
        spec: &ProviderSpec,
        timeout: Duration,
    ) -> Self {
        Self::new(gateway, spec.backend, spec.preamble.clone(), timeout)
    }
}

impl GatewayAdapter {
    async fn send(
        &self,
        model: &str,
        question: &str,
        attribution: Attribution,
    ) -> Result<String, ProbeError> {
        let req = ChatRequest::new(
            ChatModel::new(self.backend, model),
            probe_messages(&self.preamble, question),
            attribution,
        );

        match tokio::time::timeout(self.timeout, self.gateway.chat(req)).await {
            Ok(Ok(resp)) => Ok(resp.content),
            Ok(Err(e)) => Err(ProbeError::ProviderCallFailed(e)),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GatewayAdapter {
    async fn ask(&self, model: &str, question: &str) -> Result<String, ProbeError> {
        self.send(model, question, self.attribution.clone()).await
    }

    async fn ask_in_refresh(
        &self,
        refresh_id: Uuid,
        model: &str,
        question: &str,
    ) -> Result<String, ProbeError> {
        let attribution = self.attribution.clone().with_refresh(refresh_id);
        self.send(model, question, attribution).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, FinishReason, Role};
    use std::sync::Mutex;

    struct RecordingGateway {
        seen: Mutex<Vec<ChatRequest>>,
        delay: Duration,
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            tokio::time::sleep(self.delay).await;
            let content = format!("answer from {}", req.model.model_id());
            self.seen.lock().unwrap().push(req);
            Ok(ChatResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
                latency: Duration::ZERO,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn sends_preamble_as_system_message() {
        let gateway = Arc::new(RecordingGateway {
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        });
        let adapter = GatewayAdapter::new(
            gateway.clone(),
            Backend::Anthropic,
            "Answer as a numbered list.",
            Duration::from_secs(5),
        );

        let answer = adapter.ask("claude-3-5-haiku-latest", "best crm?").await.unwrap();
        assert_eq!(answer, "answer from claude-3-5-haiku-latest");

        let seen = gateway.seen.lock().unwrap();
        assert_eq!(seen[0].model.backend(), Backend::Anthropic);
        assert_eq!(seen[0].messages[0].role, Role::System);
        assert_eq!(seen[0].messages[0].content, "Answer as a numbered list.");
        assert_eq!(seen[0].messages[1].content, "best crm?");
    }

    #[tokio::test]
    async fn refresh_calls_carry_the_refresh_id() {
        let gateway = Arc::new(RecordingGateway {
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        });
        let adapter =
            GatewayAdapter::new(gateway.clone(), Backend::Gemini, "", Duration::from_secs(5));
        let refresh_id = Uuid::new_v4();

        adapter.ask("gemini-2.0-flash", "q").await.unwrap();
        adapter
            .ask_in_refresh(refresh_id, "gemini-2.0-flash", "q")
            .await
            .unwrap();

        let seen = gateway.seen.lock().unwrap();
        assert_eq!(seen[0].attribution.refresh_id, None);
        assert_eq!(seen[1].attribution.refresh_id, Some(refresh_id));
        assert_eq!(seen[1].attribution.caller, "adapter::ask");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_becomes_timeout() {
        let gateway = Arc::new(RecordingGateway {
            seen: Mutex::new(Vec::new()),
            delay: Duration::from_secs(60),
        });
        let adapter = GatewayAdapter::new(gateway, Backend::OpenAi, "", Duration::from_secs(1));

        let err = adapter.ask("gpt-4o-mini", "q").await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(d) if d == Duration::from_secs(1)));
    }
}
