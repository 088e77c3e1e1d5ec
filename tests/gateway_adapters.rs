use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rankwatch::gateway::{
    AnthropicAdapter, Attribution, CallCounts, ChatModel, ChatProvider, ChatRequest,
    CountingUsageSink, FinishReason, GatewayConfig, GeminiAdapter, Message, NoopUsageSink,
    OpenAiAdapter, ProviderError, ProviderGateway,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn probe(model: ChatModel) -> ChatRequest {
    ChatRequest::new(
        model,
        vec![
            Message::system("Answer with a numbered list."),
            Message::user("best crm for startups?"),
        ],
        Attribution::new("test"),
    )
}

#[tokio::test]
async fn openai_parses_success_content_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "Answer with a numbered list."},
                {"role": "user", "content": "best crm for startups?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "1. Acme Corp\n2. Beta Inc" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 20 }
        })))
        .mount(&server)
        .await;

    let adapter =
        OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter.chat(&probe(ChatModel::openai("gpt-4o-mini"))).await.unwrap();

    assert_eq!(resp.content, "1. Acme Corp\n2. Beta Inc");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 20);
}

#[tokio::test]
async fn anthropic_sends_system_field_and_reads_first_text_block() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-haiku-latest",
            "max_tokens": 1024,
            "system": "Answer with a numbered list.",
            "messages": [{"role": "user", "content": "best crm for startups?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "1. Beta Inc\n2. Acme Corp"}
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 7, "output_tokens": 9 }
        })))
        .mount(&server)
        .await;

    let adapter =
        AnthropicAdapter::with_config("ak-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter
        .chat(&probe(ChatModel::anthropic("claude-3-5-haiku-latest")))
        .await
        .unwrap();

    assert_eq!(resp.content, "1. Beta Inc\n2. Acme Corp");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!((resp.input_tokens, resp.output_tokens), (7, 9));
}

#[tokio::test]
async fn gemini_uses_system_instruction_and_joins_parts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "gk-test"))
        .and(body_partial_json(json!({
            "systemInstruction": { "parts": [{"text": "Answer with a numbered list."}] },
            "contents": [{ "role": "user", "parts": [{"text": "best crm for startups?"}] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{"text": "1. Acme"}, {"text": " Corp"}] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 4 }
        })))
        .mount(&server)
        .await;

    let adapter =
        GeminiAdapter::with_config("gk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter
        .chat(&probe(ChatModel::gemini("gemini-2.0-flash")))
        .await
        .unwrap();

    assert_eq!(resp.content, "1. Acme Corp");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!((resp.input_tokens, resp.output_tokens), (3, 4));
}

#[tokio::test]
async fn openai_classifies_http_429_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .insert_header("retry-after", "7")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let adapter =
        OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let err = adapter
        .chat(&probe(ChatModel::openai("gpt-4o-mini")))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    match err {
        ProviderError::RateLimited {
            provider,
            retry_after,
            context,
        } => {
            assert_eq!(provider, "openai");
            assert_eq!(retry_after, Duration::from_secs(7));
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn anthropic_bad_request_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "type": "error",
            "error": { "type": "invalid_request_error", "message": "model not found" }
        })))
        .mount(&server)
        .await;

    let adapter =
        AnthropicAdapter::with_config("ak-test", server.uri(), Duration::from_secs(5)).unwrap();
    let err = adapter
        .chat(&probe(ChatModel::anthropic("claude-nope")))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert!(matches!(
        err,
        ProviderError::InvalidRequest { ref message, .. } if message == "model not found"
    ));
}

#[tokio::test]
async fn anthropic_overloaded_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        })))
        .mount(&server)
        .await;

    let adapter =
        AnthropicAdapter::with_config("ak-test", server.uri(), Duration::from_secs(5)).unwrap();
    let err = adapter
        .chat(&probe(ChatModel::anthropic("claude-3-5-haiku-latest")))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.http_status(), Some(529));
    assert!(matches!(err, ProviderError::Provider { ref message, .. } if message == "Overloaded"));
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn provider_gateway_retries_on_retryable_errors_and_succeeds() {
    let server = MockServer::start().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let first = ResponseTemplate::new(503).set_body_json(json!({
        "error": { "message": "overloaded", "code": "internal" }
    }));
    let second = ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
    }));

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls,
            first,
            second,
        })
        .mount(&server)
        .await;

    let adapter =
        OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let usage = Arc::new(CountingUsageSink::default());
    let gateway = ProviderGateway::with_config(
        Arc::new(adapter),
        usage.clone(),
        GatewayConfig {
            max_retries: 1,
            retry_base_delay: Duration::from_millis(0),
        },
    );

    let resp = gateway.chat(probe(ChatModel::openai("gpt-4o-mini"))).await.unwrap();
    assert_eq!(resp.content, "ok");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);

    let counts = usage.snapshot();
    assert_eq!(
        counts.get("gpt-4o-mini"),
        Some(&CallCounts {
            calls: 2,
            failures: 1,
            tokens: 2,
        })
    );
}

#[tokio::test]
async fn provider_gateway_does_not_retry_permanent_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "no such model" }
        })))
        .mount(&server)
        .await;

    let adapter =
        OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let gateway = ProviderGateway::with_config(
        Arc::new(adapter),
        Arc::new(NoopUsageSink),
        GatewayConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(0),
        },
    );

    let err = gateway
        .chat(probe(ChatModel::openai("gpt-0")))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
