//! Configuration loaded once at startup.
//!
//! Layers, later wins:
//!
//! 1. built-in defaults,
//! 2. an optional JSON file (`--config` or `RANKWATCH_CONFIG`),
//! 3. environment overrides:
//!    - `RANKWATCH_STORE` - SQLite path
//!    - `RANKWATCH_QUESTION_CONCURRENCY` - probes in flight per model
//!    - `RANKWATCH_MODEL_CONCURRENCY` - models refreshed at once
//!    - `RANKWATCH_TIMEOUT_SECONDS` - per-call provider timeout
//!    - `RANKWATCH_EXTRACTION` - `deterministic`, `assisted_fallback` or `assisted`
//!
//! Vendor credentials are read separately by the gateway adapters
//! (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::GatewayAdapter;
use crate::extract::{AssistedExtractor, ExtractionPolicy, RankExtractor};
use crate::gateway::{
    backoff_delay, Backend, ChatGateway, ChatModel, GatewayConfig, ProviderError, ProviderGateway,
    TracingUsageSink,
};
use crate::providers::{ModelSpec, ProviderLabel, ProviderRegistry};
use crate::refresh::{RefreshConfig, Refresher};
use crate::store::ResultStore;

pub const CONFIG_PATH_ENV: &str = "RANKWATCH_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Per-provider overrides of the built-in registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub preamble: Option<String>,
    /// Replaces the built-in model list when non-empty.
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankwatchConfig {
    pub store_path: PathBuf,
    pub question_concurrency: usize,
    pub model_concurrency: usize,
    pub timeout_seconds: u64,
    pub gateway_max_retries: u32,
    pub gateway_retry_base_ms: u64,
    pub store_write_retries: u32,
    pub extraction: ExtractionPolicy,
    pub assisted_provider: ProviderLabel,
    /// Defaults to the first registry model of `assisted_provider`.
    pub assisted_model: Option<String>,
    pub providers: BTreeMap<ProviderLabel, ProviderOverride>,
}

impl Default for RankwatchConfig {
    fn default() -> Self {
        let refresh = RefreshConfig::default();
        let gateway = GatewayConfig::default();
        Self {
            store_path: PathBuf::from("rankwatch.sqlite"),
            question_concurrency: refresh.question_concurrency,
            model_concurrency: refresh.model_concurrency,
            timeout_seconds: 60,
            gateway_max_retries: gateway.max_retries,
            gateway_retry_base_ms: gateway.retry_base_delay.as_millis() as u64,
            store_write_retries: refresh.store_write_retries,
            extraction: ExtractionPolicy::Deterministic,
            assisted_provider: ProviderLabel::Gpt,
            assisted_model: None,
            providers: BTreeMap::new(),
        }
    }
}

impl RankwatchConfig {
    /// Defaults, then `path` (or `RANKWATCH_CONFIG`), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `RANKWATCH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RANKWATCH_STORE") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RANKWATCH_QUESTION_CONCURRENCY") {
            self.question_concurrency = parse_env("RANKWATCH_QUESTION_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("RANKWATCH_MODEL_CONCURRENCY") {
            self.model_concurrency = parse_env("RANKWATCH_MODEL_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("RANKWATCH_TIMEOUT_SECONDS") {
            self.timeout_seconds = parse_env("RANKWATCH_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("RANKWATCH_EXTRACTION") {
            self.extraction = v.parse().map_err(|message| ConfigError::Env {
                var: "RANKWATCH_EXTRACTION",
                message,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.question_concurrency == 0 {
            return Err(ConfigError::Invalid("question_concurrency must be at least 1".into()));
        }
        if self.model_concurrency == 0 {
            return Err(ConfigError::Invalid("model_concurrency must be at least 1".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeout_seconds must be at least 1".into()));
        }
        if self.assisted_model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid("assisted_model must not be blank".into()));
        }
        for (label, o) in &self.providers {
            if o.models.iter().any(|m| m.name.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{label}' has a model with an empty name"
                )));
            }
        }
        Ok(())
    }

    /// Transport timeout for a single vendor HTTP attempt.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Outer budget for one probe: every gateway attempt at the transport
    /// timeout plus the backoff between attempts.
    pub fn probe_timeout(&self) -> Duration {
        let gateway = self.gateway_config();
        let backoff: Duration = (0..gateway.max_retries)
            .map(|attempt| backoff_delay(gateway.retry_base_delay, attempt))
            .sum();
        self.timeout() * (gateway.max_retries + 1) + backoff
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_retries: self.gateway_max_retries,
            retry_base_delay: Duration::from_millis(self.gateway_retry_base_ms),
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            question_concurrency: self.question_concurrency,
            model_concurrency: self.model_concurrency,
            store_write_retries: self.store_write_retries,
            ..RefreshConfig::default()
        }
    }

    /// Built-in registry with this config's overrides applied.
    pub fn registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::default();
        for (label, o) in &self.providers {
            if let Some(preamble) = &o.preamble {
                registry.set_preamble(*label, preamble.clone());
            }
            registry.set_models(*label, o.models.clone());
        }
        registry
    }

    /// Gateway for `backend` with credentials from the environment.
    pub fn gateway(&self, backend: Backend) -> Result<Arc<dyn ChatGateway>, ConfigError> {
        let gateway = ProviderGateway::from_env(
            backend,
            self.timeout(),
            Arc::new(TracingUsageSink),
            self.gateway_config(),
        )?;
        Ok(Arc::new(gateway))
    }

    /// Model asked for assisted extraction, on `assisted_provider`.
    pub fn assisted_model(&self, registry: &ProviderRegistry) -> Result<String, ConfigError> {
        if let Some(model) = &self.assisted_model {
            return Ok(model.trim().to_string());
        }
        registry
            .get(self.assisted_provider)
            .models
            .first()
            .map(|m| m.name.clone())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "provider '{}' has no models for assisted extraction",
                    self.assisted_provider
                ))
            })
    }

    /// Rank extractor for the configured policy. Only builds a gateway when the
    /// policy can call a model.
    pub fn extractor(&self, registry: &ProviderRegistry) -> Result<RankExtractor, ConfigError> {
        if self.extraction == ExtractionPolicy::Deterministic {
            return Ok(RankExtractor::deterministic());
        }
        let spec = registry.get(self.assisted_provider);
        let model = self.assisted_model(registry)?;
        let assistant = AssistedExtractor::new(
            self.gateway(spec.backend)?,
            ChatModel::new(spec.backend, model),
        );
        Ok(RankExtractor::with_assistant(self.extraction, assistant))
    }

    /// Refresher wired for `label` only, so a refresh needs just that
    /// vendor's credentials (plus the assisted provider's, if enabled).
    pub fn refresher(
        &self,
        store: Arc<dyn ResultStore>,
        label: ProviderLabel,
    ) -> Result<Refresher, ConfigError> {
        let registry = self.registry();
        let spec = registry.get(label);
        let adapter =
            GatewayAdapter::for_provider(self.gateway(spec.backend)?, spec, self.probe_timeout());
        let extractor = self.extractor(&registry)?;
        Ok(Refresher::new(store, Arc::new(registry))
            .with_config(self.refresh_config())
            .with_extractor(extractor)
            .with_adapter(label, Arc::new(adapter)))
    }
}

fn parse_env<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        message: e.to_string(),
    })
}
