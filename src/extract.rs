//! Rank extraction: turn one free-text answer into an optional integer rank.
//!
//! The deterministic path reads numbered-list lines (`3. Foo`, `3) Foo`) and
//! credits the first line mentioning the company by name or site URL. Prose
//! mentions, lettered lists and bolded ordinals are not recognized.
//!
//! The assisted path asks a model to reply with a bare integer, `unranked` or
//! `null`. It does network I/O and can fail; callers degrade failures to a
//! `None` rank.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::{rank_extraction_messages, NULL_TOKEN, UNRANKED_TOKEN};

// =============================================================================
// Deterministic
// =============================================================================

fn numbered_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)[.)]\s*(.*)$").expect("numbered-line regex is valid"))
}

/// Deterministic extraction. Returns the leading integer of the first numbered
/// line whose trailing text contains the site URL or the company name
/// (case-insensitive), or `None`.
pub fn extract_rank(answer: &str, company_name: &str, company_url: &str) -> Option<i64> {
    if answer.trim().is_empty() {
        return None;
    }

    let name = company_name.trim().to_lowercase();
    let url = company_url.trim().to_lowercase();
    if name.is_empty() && url.is_empty() {
        return None;
    }

    for line in answer.lines() {
        let Some(caps) = numbered_line().captures(line) else {
            continue;
        };
        let trailing = caps[2].to_lowercase();
        let mentions = (!url.is_empty() && trailing.contains(&url))
            || (!name.is_empty() && trailing.contains(&name));
        if !mentions {
            continue;
        }
        // Leading digits that overflow i64 cannot be a list position.
        if let Ok(rank) = caps[1].parse::<i64>() {
            return Some(rank);
        }
    }
    None
}

// =============================================================================
// Assisted
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("rank extraction call failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("rank extraction reply not understood: {0:?}")]
    Ambiguous(String),
}

/// Parse an assisted-extraction reply: `null` / `unranked` → `None`, an
/// integer → `Some(n)`, anything else is ambiguous.
pub fn parse_assisted_reply(reply: &str) -> Result<Option<i64>, ExtractError> {
    let trimmed = reply.trim();
    if trimmed.eq_ignore_ascii_case(NULL_TOKEN) || trimmed.eq_ignore_ascii_case(UNRANKED_TOKEN) {
        return Ok(None);
    }
    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ExtractError::Ambiguous(trimmed.chars().take(80).collect()))
}

/// Model-backed extractor used as the secondary path.
#[derive(Clone)]
pub struct AssistedExtractor {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
}

impl AssistedExtractor {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self { gateway, model }
    }

    pub async fn extract(
        &self,
        answer: &str,
        company_name: &str,
        company_url: &str,
        attribution: Attribution,
    ) -> Result<Option<i64>, ExtractError> {
        if answer.trim().is_empty() {
            return Ok(None);
        }
        let req = ChatRequest::new(
            self.model.clone(),
            rank_extraction_messages(answer, company_name, company_url),
            attribution,
        )
        .temperature(0.0)
        .max_tokens(8);

        let resp = self.gateway.chat(req).await?;
        parse_assisted_reply(&resp.content)
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Which extraction path(s) a refresh uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    /// Numbered-list scan only. No network.
    #[default]
    Deterministic,
    /// Numbered-list scan; ask a model only when the scan finds nothing.
    AssistedFallback,
    /// Ask a model for every answer.
    Assisted,
}

impl ExtractionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::AssistedFallback => "assisted_fallback",
            Self::Assisted => "assisted",
        }
    }
}

impl fmt::Display for ExtractionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "assisted_fallback" | "fallback" => Ok(Self::AssistedFallback),
            "assisted" => Ok(Self::Assisted),
            other => Err(format!("unknown extraction policy '{other}'")),
        }
    }
}

/// Which path produced a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Deterministic,
    Assisted,
}

/// Outcome of extracting one answer. `failure` is set when the assisted path
/// was consulted and failed; `rank` is then `None`.
#[derive(Debug)]
pub struct Extraction {
    pub rank: Option<i64>,
    pub method: ExtractionMethod,
    pub failure: Option<ExtractError>,
}

impl Extraction {
    fn deterministic(rank: Option<i64>) -> Self {
        Self {
            rank,
            method: ExtractionMethod::Deterministic,
            failure: None,
        }
    }

    fn assisted(result: Result<Option<i64>, ExtractError>) -> Self {
        match result {
            Ok(rank) => Self {
                rank,
                method: ExtractionMethod::Assisted,
                failure: None,
            },
            Err(e) => Self {
                rank: None,
                method: ExtractionMethod::Assisted,
                failure: Some(e),
            },
        }
    }
}

/// Applies an [`ExtractionPolicy`]. Without an assistant every policy behaves
/// as [`ExtractionPolicy::Deterministic`].
#[derive(Clone, Default)]
pub struct RankExtractor {
    policy: ExtractionPolicy,
    assistant: Option<AssistedExtractor>,
}

impl RankExtractor {
    pub fn deterministic() -> Self {
        Self::default()
    }

    pub fn with_assistant(policy: ExtractionPolicy, assistant: AssistedExtractor) -> Self {
        Self {
            policy,
            assistant: Some(assistant),
        }
    }

    pub fn policy(&self) -> ExtractionPolicy {
        match self.assistant {
            Some(_) => self.policy,
            None => ExtractionPolicy::Deterministic,
        }
    }

    pub async fn extract(
        &self,
        answer: &str,
        company_name: &str,
        company_url: &str,
        attribution: Attribution,
    ) -> Extraction {
        if answer.trim().is_empty() {
            return Extraction::deterministic(None);
        }
        let assistant = match (&self.assistant, self.policy) {
            (Some(a), ExtractionPolicy::Assisted) => {
                return Extraction::assisted(
                    a.extract(answer, company_name, company_url, attribution).await,
                );
            }
            (Some(a), ExtractionPolicy::AssistedFallback) => Some(a),
            _ => None,
        };

        let rank = extract_rank(answer, company_name, company_url);
        match (rank, assistant) {
            (None, Some(a)) => Extraction::assisted(
                a.extract(answer, company_name, company_url, attribution)
                    .await,
            ),
            _ => Extraction::deterministic(rank),
        }
    }
}
