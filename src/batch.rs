//! Batch runner: one model across an ordered question set.
//!
//! Every question is asked exactly once. A failed probe becomes an error
//! marker in its slot and never stops the rest of the batch. Up to
//! `concurrency` probes are in flight at a time; results come back in input
//! order regardless of completion order.

use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::adapter::{ProbeError, ProviderAdapter};

/// One slot of a batch result.
#[derive(Debug)]
pub struct ProbeResult {
    pub question_id: i64,
    pub question_text: String,
    pub outcome: Result<String, ProbeError>,
}

impl ProbeResult {
    /// Answer text if the probe succeeded with a non-blank answer.
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            Ok(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ProbeError> {
        self.outcome.as_ref().err()
    }
}

/// Ask `model` every question through `adapter`.
///
/// The returned vector has the same length and order as `questions`.
pub async fn run_batch(
    adapter: &dyn ProviderAdapter,
    model: &str,
    questions: &[(i64, String)],
    concurrency: usize,
) -> Vec<ProbeResult> {
    run(adapter, None, model, questions, concurrency).await
}

/// [`run_batch`] with every probe attributed to `refresh_id`.
pub async fn run_refresh_batch(
    adapter: &dyn ProviderAdapter,
    refresh_id: Uuid,
    model: &str,
    questions: &[(i64, String)],
    concurrency: usize,
) -> Vec<ProbeResult> {
    run(adapter, Some(refresh_id), model, questions, concurrency).await
}

async fn run(
    adapter: &dyn ProviderAdapter,
    refresh_id: Option<Uuid>,
    model: &str,
    questions: &[(i64, String)],
    concurrency: usize,
) -> Vec<ProbeResult> {
    let probes = questions.iter().map(|(question_id, text)| async move {
        let outcome = match refresh_id {
            Some(id) => adapter.ask_in_refresh(id, model, text).await,
            None => adapter.ask(model, text).await,
        };
        match &outcome {
            Ok(answer) => tracing::debug!(
                model,
                question_id,
                answer_chars = answer.len(),
                "probe answered"
            ),
            Err(e) => tracing::warn!(model, question_id, error = %e, "probe failed"),
        }
        ProbeResult {
            question_id: *question_id,
            question_text: text.clone(),
            outcome,
        }
    });

    stream::iter(probes)
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers instantly except for later questions, which are slower, so
    /// completion order differs from submission order.
    struct StaggeredAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for StaggeredAdapter {
        async fn ask(&self, _model: &str, question: &str) -> Result<String, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: u64 = question.trim_start_matches('q').parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
            Ok(format!("answer to {question}"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_input_order_under_concurrency() {
        let adapter = StaggeredAdapter {
            calls: AtomicUsize::new(0),
        };
        let questions: Vec<(i64, String)> = (1..=4).map(|i| (i, format!("q{i}"))).collect();

        let results = run_batch(&adapter, "m", &questions, 4).await;

        assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
        let ids: Vec<i64> = results.iter().map(|r| r.question_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(results[2].answer(), Some("answer to q3"));
    }

    /// Answers with the refresh id it was called under, if any.
    struct EchoRefreshAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoRefreshAdapter {
        async fn ask(&self, _model: &str, _question: &str) -> Result<String, ProbeError> {
            Ok("none".to_string())
        }

        async fn ask_in_refresh(
            &self,
            refresh_id: Uuid,
            _model: &str,
            _question: &str,
        ) -> Result<String, ProbeError> {
            Ok(refresh_id.to_string())
        }
    }

    #[tokio::test]
    async fn refresh_batch_attributes_every_probe() {
        let questions: Vec<(i64, String)> = (1..=3).map(|i| (i, format!("q{i}"))).collect();
        let refresh_id = Uuid::new_v4();

        let tagged = run_refresh_batch(&EchoRefreshAdapter, refresh_id, "m", &questions, 2).await;
        let plain = run_batch(&EchoRefreshAdapter, "m", &questions, 2).await;

        let expected = refresh_id.to_string();
        assert!(tagged.iter().all(|r| r.answer() == Some(expected.as_str())));
        assert!(plain.iter().all(|r| r.answer() == Some("none")));
    }

    struct BlankAdapter;

    #[async_trait]
    impl ProviderAdapter for BlankAdapter {
        async fn ask(&self, _model: &str, _question: &str) -> Result<String, ProbeError> {
            Err(ProviderError::config("no key").into())
        }
    }

    #[tokio::test]
    async fn empty_question_set_yields_empty_result() {
        let results = run_batch(&BlankAdapter, "m", &[], 0).await;
        assert!(results.is_empty());
    }
}
