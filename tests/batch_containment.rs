use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rankwatch::adapter::{GatewayAdapter, ProbeError, ProviderAdapter};
use rankwatch::batch::run_batch;
use rankwatch::gateway::{
    Backend, ChatGateway, ChatRequest, ChatResponse, FinishReason, ProviderError,
};

/// Fails the question whose text is exactly `fail_on`.
struct FlakyAdapter {
    fail_on: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl ProviderAdapter for FlakyAdapter {
    async fn ask(&self, model: &str, question: &str) -> Result<String, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if question == self.fail_on {
            return Err(ProviderError::provider("openai", "upstream exploded", true).into());
        }
        Ok(format!("{model}: answer to {question}"))
    }
}

fn five_questions() -> Vec<(i64, String)> {
    (1..=5).map(|i| (i * 10, format!("question {i}"))).collect()
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let adapter = FlakyAdapter {
        fail_on: "question 3",
        calls: AtomicUsize::new(0),
    };

    let results = run_batch(&adapter, "gpt-4o-mini", &five_questions(), 2).await;

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 5);
    assert_eq!(results.len(), 5);
    assert_eq!(
        results.iter().map(|r| r.question_id).collect::<Vec<_>>(),
        vec![10, 20, 30, 40, 50]
    );
    assert_eq!(results.iter().filter(|r| r.answer().is_some()).count(), 4);
    assert!(matches!(
        results[2].error(),
        Some(ProbeError::ProviderCallFailed(_))
    ));
    assert_eq!(results[2].question_text, "question 3");
    assert_eq!(results[4].answer(), Some("gpt-4o-mini: answer to question 5"));
}

#[tokio::test]
async fn sequential_and_concurrent_runs_agree() {
    let adapter = FlakyAdapter {
        fail_on: "question 1",
        calls: AtomicUsize::new(0),
    };
    let questions = five_questions();

    let sequential = run_batch(&adapter, "m", &questions, 1).await;
    let concurrent = run_batch(&adapter, "m", &questions, 8).await;

    let shape = |rs: &[rankwatch::batch::ProbeResult]| {
        rs.iter()
            .map(|r| (r.question_id, r.answer().map(str::to_string)))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&sequential), shape(&concurrent));
}

/// Gateway that hangs on one question to exercise the per-call timeout.
struct HangingGateway;

#[async_trait]
impl ChatGateway for HangingGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let question = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if question == "question 3" {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(ChatResponse {
            content: format!("1. Acme ({question})"),
            input_tokens: 1,
            output_tokens: 1,
            latency: Duration::ZERO,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_is_contained_like_a_failure() {
    let adapter = GatewayAdapter::new(
        Arc::new(HangingGateway),
        Backend::Gemini,
        "Answer with a numbered list.",
        Duration::from_secs(30),
    );

    let results = run_batch(&adapter, "gemini-2.0-flash", &five_questions(), 5).await;

    assert_eq!(results.len(), 5);
    assert!(matches!(results[2].error(), Some(ProbeError::Timeout(_))));
    assert_eq!(results.iter().filter(|r| r.answer().is_some()).count(), 4);
}
