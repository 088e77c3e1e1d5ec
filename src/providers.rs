//! Static provider registry: which models belong to which provider bucket.
//!
//! Resolved once at startup. Call sites look a provider up by [`ProviderLabel`]
//! instead of branching on label strings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::gateway::Backend;
use crate::prompts::DEFAULT_PROBE_PREAMBLE;

/// Provider bucket a refresh or ranking table is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderLabel {
    Gpt,
    Claude,
    Gemini,
}

impl ProviderLabel {
    pub const ALL: [ProviderLabel; 3] = [
        ProviderLabel::Gpt,
        ProviderLabel::Claude,
        ProviderLabel::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider '{0}' (expected one of: gpt, claude, gemini)")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderLabel {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpt" => Ok(Self::Gpt),
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// One queryable model variant and how the ranking table labels it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Vendor model id; also the unique `models.name` key in the store.
    pub name: String,
    /// Column header in the ranking table.
    pub display_name: String,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
        }
    }
}

/// Everything the pipeline needs to know about one provider bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub label: ProviderLabel,
    /// Vendor display name ("OpenAI", "Anthropic", "Google").
    pub vendor: String,
    /// Vendor API the models are served from.
    pub backend: Backend,
    /// Stored as the provider label of model rows created for this provider.
    pub model_label: String,
    /// Instruction preamble sent with every probe.
    pub preamble: String,
    /// Models queried on refresh, in table column order.
    pub models: Vec<ModelSpec>,
}

impl ProviderSpec {
    pub fn model(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }
}

/// Closed mapping `ProviderLabel -> ProviderSpec`.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderLabel, ProviderSpec>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let preamble = DEFAULT_PROBE_PREAMBLE.to_string();
        let mut providers = BTreeMap::new();
        providers.insert(
            ProviderLabel::Gpt,
            ProviderSpec {
                label: ProviderLabel::Gpt,
                vendor: "OpenAI".into(),
                backend: Backend::OpenAi,
                model_label: "openai".into(),
                preamble: preamble.clone(),
                models: vec![
                    ModelSpec::new("gpt-3.5-turbo", "GPT-3.5 Turbo"),
                    ModelSpec::new("gpt-4o-mini", "4o mini"),
                    ModelSpec::new("chatgpt-4o-latest", "4o latest"),
                ],
            },
        );
        providers.insert(
            ProviderLabel::Claude,
            ProviderSpec {
                label: ProviderLabel::Claude,
                vendor: "Anthropic".into(),
                backend: Backend::Anthropic,
                model_label: "claude".into(),
                preamble: preamble.clone(),
                models: vec![
                    ModelSpec::new("claude-3-7-sonnet-latest", "Claude 3.7 Sonnet"),
                    ModelSpec::new("claude-3-5-haiku-latest", "Claude 3.5 Haiku"),
                ],
            },
        );
        providers.insert(
            ProviderLabel::Gemini,
            ProviderSpec {
                label: ProviderLabel::Gemini,
                vendor: "Google".into(),
                backend: Backend::Gemini,
                model_label: "gemini".into(),
                preamble,
                models: vec![
                    ModelSpec::new("gemini-2.0-flash", "Gemini Flash 2.0"),
                    ModelSpec::new("gemini-1.5-flash", "Gemini Flash 1.5"),
                    ModelSpec::new("gemini-1.5-pro", "Gemini Pro"),
                ],
            },
        );
        Self { providers }
    }
}

impl ProviderRegistry {
    pub fn get(&self, label: ProviderLabel) -> &ProviderSpec {
        // Every label is inserted by construction and entries are never removed.
        &self.providers[&label]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }

    /// Replace the model list for a provider. Empty lists are ignored.
    pub fn set_models(&mut self, label: ProviderLabel, models: Vec<ModelSpec>) {
        if models.is_empty() {
            return;
        }
        if let Some(spec) = self.providers.get_mut(&label) {
            spec.models = models;
        }
    }

    pub fn set_preamble(&mut self, label: ProviderLabel, preamble: impl Into<String>) {
        if let Some(spec) = self.providers.get_mut(&label) {
            spec.preamble = preamble.into();
        }
    }
}
