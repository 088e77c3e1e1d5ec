//! Refresh orchestration: re-query every model of one provider for every
//! question of one company and append a rank observation per answer.
//!
//! Only a missing company (or a store failure while loading it) aborts a
//! refresh. Everything else is contained to one observation:
//!
//! - a failed or empty probe still appends a `None` rank,
//! - a failed assisted extraction degrades to a `None` rank,
//! - an append that keeps failing after retries is dropped and logged.
//!
//! Each append commits on its own, so cancelling a refresh mid-flight leaves
//! earlier observations in place and later pairs unobserved.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::adapter::ProviderAdapter;
use crate::batch::{run_refresh_batch, ProbeResult};
use crate::extract::{ExtractError, RankExtractor};
use crate::gateway::{backoff_delay, Attribution};
use crate::providers::{ModelSpec, ProviderLabel, ProviderRegistry};
use crate::store::{Company, ResultStore, StoreError};

// =============================================================================
// Errors & failure taxonomy
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("company {0} not found")]
    NotFound(i64),
    #[error("no adapter configured for provider '{0}'")]
    Unconfigured(ProviderLabel),
    #[error("failed to load company {company_id}: {source}")]
    Load {
        company_id: i64,
        #[source]
        source: StoreError,
    },
}

/// Kinds of failure a refresh can run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    ProviderCallFailed,
    ExtractionAmbiguous,
    StoreWriteFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ProviderCallFailed => "provider_call_failed",
            Self::ExtractionAmbiguous => "extraction_ambiguous",
            Self::StoreWriteFailed => "store_write_failed",
        }
    }
}

/// One contained failure, kept for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationFailure {
    pub kind: FailureKind,
    pub model: String,
    /// `None` when the failure covers the whole model (e.g. the model row
    /// could not be resolved).
    pub question_id: Option<i64>,
    pub message: String,
}

// =============================================================================
// Config & summary
// =============================================================================

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Probes in flight per model.
    pub question_concurrency: usize,
    /// Models refreshed at once.
    pub model_concurrency: usize,
    /// Retries per store write after the first attempt.
    pub store_write_retries: u32,
    pub store_retry_base_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            question_concurrency: 4,
            model_concurrency: 2,
            store_write_retries: 3,
            store_retry_base_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelRefreshSummary {
    pub model: String,
    pub display_name: String,
    pub model_id: Option<i64>,
    /// Probes sent.
    pub attempted: usize,
    /// Probes that came back with a non-blank answer.
    pub answered: usize,
    /// Observations written with a rank.
    pub ranked: usize,
    /// Observations written with a `None` rank.
    pub null_ranks: usize,
    pub fetch_failures: usize,
    pub ambiguous_extractions: usize,
    pub dropped_writes: usize,
}

impl ModelRefreshSummary {
    fn new(model: &ModelSpec) -> Self {
        Self {
            model: model.name.clone(),
            display_name: model.display_name.clone(),
            ..Default::default()
        }
    }

    pub fn written(&self) -> usize {
        self.ranked + self.null_ranks
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub refresh_id: Uuid,
    pub company_id: i64,
    pub provider: ProviderLabel,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub questions: usize,
    /// In registry order.
    pub models: Vec<ModelRefreshSummary>,
    pub failures: Vec<ObservationFailure>,
}

impl RefreshSummary {
    pub fn observations_written(&self) -> usize {
        self.models.iter().map(ModelRefreshSummary::written).sum()
    }

    /// Failure counts by kind.
    pub fn failure_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for f in &self.failures {
            *counts.entry(f.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

// =============================================================================
// Refresher
// =============================================================================

/// Top-level entry point for refreshing one company under one provider.
#[derive(Clone)]
pub struct Refresher {
    store: Arc<dyn ResultStore>,
    registry: Arc<ProviderRegistry>,
    adapters: BTreeMap<ProviderLabel, Arc<dyn ProviderAdapter>>,
    extractor: RankExtractor,
    config: RefreshConfig,
}

/// What happened to one question's observation.
struct ItemOutcome {
    question_id: i64,
    answered: bool,
    written: Option<Option<i64>>,
    failures: Vec<(FailureKind, String)>,
}

impl Refresher {
    pub fn new(store: Arc<dyn ResultStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            store,
            registry,
            adapters: BTreeMap::new(),
            extractor: RankExtractor::deterministic(),
            config: RefreshConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_extractor(mut self, extractor: RankExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_adapter(mut self, label: ProviderLabel, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(label, adapter);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Load the company, then re-query every model of `label`.
    ///
    /// Aborts only before any probe is sent: the company is missing or
    /// unreadable, or no adapter is configured for `label`.
    pub async fn refresh(
        &self,
        company_id: i64,
        label: ProviderLabel,
    ) -> Result<RefreshSummary, RefreshError> {
        let company = match self.store.get_company(company_id).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => return Err(RefreshError::NotFound(company_id)),
            Err(source) => return Err(RefreshError::Load { company_id, source }),
        };
        let adapter = self
            .adapters
            .get(&label)
            .cloned()
            .ok_or(RefreshError::Unconfigured(label))?;
        let questions: Vec<(i64, String)> = self
            .store
            .questions_for(company_id)
            .await
            .map_err(|source| RefreshError::Load { company_id, source })?
            .into_iter()
            .map(|q| (q.id, q.text))
            .collect();

        let refresh_id = Uuid::new_v4();
        let started_at = Utc::now();
        let spec = self.registry.get(label);
        tracing::info!(
            %refresh_id,
            company_id,
            provider = %label,
            questions = questions.len(),
            models = spec.models.len(),
            "refresh started"
        );

        let per_model: Vec<(ModelRefreshSummary, Vec<ObservationFailure>)> =
            stream::iter(spec.models.iter().map(|model| {
                self.refresh_model(
                    refresh_id,
                    &company,
                    &spec.model_label,
                    model,
                    adapter.as_ref(),
                    &questions,
                )
            }))
            .buffered(self.config.model_concurrency.max(1))
            .collect()
            .await;

        let mut models = Vec::with_capacity(per_model.len());
        let mut failures = Vec::new();
        for (summary, model_failures) in per_model {
            models.push(summary);
            failures.extend(model_failures);
        }

        let summary = RefreshSummary {
            refresh_id,
            company_id,
            provider: label,
            started_at,
            finished_at: Utc::now(),
            questions: questions.len(),
            models,
            failures,
        };
        tracing::info!(
            %refresh_id,
            company_id,
            provider = %label,
            written = summary.observations_written(),
            failures = summary.failures.len(),
            "refresh finished"
        );
        Ok(summary)
    }

    async fn refresh_model(
        &self,
        refresh_id: Uuid,
        company: &Company,
        model_label: &str,
        model: &ModelSpec,
        adapter: &dyn ProviderAdapter,
        questions: &[(i64, String)],
    ) -> (ModelRefreshSummary, Vec<ObservationFailure>) {
        let mut summary = ModelRefreshSummary::new(model);
        let mut failures = Vec::new();

        let model_id = match self
            .with_write_retries("get_or_create_model", || {
                self.store.get_or_create_model(&model.name, model_label)
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    %refresh_id,
                    model = %model.name,
                    error = %e,
                    "could not resolve model; skipping"
                );
                failures.push(ObservationFailure {
                    kind: FailureKind::StoreWriteFailed,
                    model: model.name.clone(),
                    question_id: None,
                    message: e.to_string(),
                });
                return (summary, failures);
            }
        };
        summary.model_id = Some(model_id);

        let results = run_refresh_batch(
            adapter,
            refresh_id,
            &model.name,
            questions,
            self.config.question_concurrency,
        )
        .await;
        summary.attempted = results.len();

        let outcomes: Vec<ItemOutcome> = stream::iter(
            results
                .iter()
                .map(|result| self.record_observation(refresh_id, company, model_id, result)),
        )
        .buffer_unordered(self.config.question_concurrency.max(1))
        .collect()
        .await;

        for outcome in outcomes {
            if outcome.answered {
                summary.answered += 1;
            }
            match outcome.written {
                Some(Some(_)) => summary.ranked += 1,
                Some(None) => summary.null_ranks += 1,
                None => summary.dropped_writes += 1,
            }
            for (kind, message) in outcome.failures {
                match kind {
                    FailureKind::ProviderCallFailed if !outcome.answered => {
                        summary.fetch_failures += 1
                    }
                    FailureKind::ExtractionAmbiguous => summary.ambiguous_extractions += 1,
                    _ => {}
                }
                failures.push(ObservationFailure {
                    kind,
                    model: model.name.clone(),
                    question_id: Some(outcome.question_id),
                    message,
                });
            }
        }

        tracing::info!(
            %refresh_id,
            model = %model.name,
            attempted = summary.attempted,
            answered = summary.answered,
            ranked = summary.ranked,
            null_ranks = summary.null_ranks,
            dropped = summary.dropped_writes,
            "model refreshed"
        );
        (summary, failures)
    }

    async fn record_observation(
        &self,
        refresh_id: Uuid,
        company: &Company,
        model_id: i64,
        result: &ProbeResult,
    ) -> ItemOutcome {
        let mut failures = Vec::new();
        if let Some(e) = result.error() {
            failures.push((FailureKind::ProviderCallFailed, e.to_string()));
        }

        let answered = result.answer().is_some();
        let rank = match result.answer() {
            Some(answer) => {
                let extraction = self
                    .extractor
                    .extract(
                        answer,
                        &company.name,
                        &company.site_url,
                        Attribution::new("extract::assisted").with_refresh(refresh_id),
                    )
                    .await;
                if let Some(e) = extraction.failure {
                    let kind = match e {
                        ExtractError::Ambiguous(_) => FailureKind::ExtractionAmbiguous,
                        ExtractError::Provider(_) => FailureKind::ProviderCallFailed,
                    };
                    tracing::warn!(
                        %refresh_id,
                        question_id = result.question_id,
                        error = %e,
                        "assisted extraction failed; recording null rank"
                    );
                    failures.push((kind, e.to_string()));
                }
                extraction.rank
            }
            None => None,
        };

        let written = match self
            .with_write_retries("append_rank", || {
                self.store.append_rank(result.question_id, model_id, rank)
            })
            .await
        {
            Ok(record) => Some(record.rank),
            Err(e) => {
                tracing::error!(
                    %refresh_id,
                    question_id = result.question_id,
                    model_id,
                    error = %e,
                    "dropping observation after write retries"
                );
                failures.push((FailureKind::StoreWriteFailed, e.to_string()));
                None
            }
        };

        ItemOutcome {
            question_id: result.question_id,
            answered,
            written,
            failures,
        }
    }

    async fn with_write_retries<T, F, Fut>(
        &self,
        op_name: &'static str,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_not_found() && attempt < self.config.store_write_retries => {
                    let delay = backoff_delay(self.config.store_retry_base_delay, attempt);
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        error = %e,
                        "store write failed; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
