//! Request and response types shared by every vendor adapter.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Who issued a gateway call. Carried into usage records.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub refresh_id: Option<Uuid>,
    /// Static call-site tag, e.g. "adapter::ask" or "extract::assisted".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_refresh(mut self, refresh_id: Uuid) -> Self {
        self.refresh_id = Some(refresh_id);
        self
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Vendor API a model is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// OpenAI-compatible `/chat/completions`.
    OpenAi,
    /// Anthropic `/messages`.
    Anthropic,
    /// Google `models/{model}:generateContent`.
    Gemini,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::OpenAi => "openai",
            Backend::Anthropic => "anthropic",
            Backend::Gemini => "gemini",
        }
    }
}

/// A vendor backend plus the vendor's model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModel {
    backend: Backend,
    id: String,
}

impl ChatModel {
    pub fn new(backend: Backend, model_id: impl Into<String>) -> Self {
        Self {
            backend,
            id: model_id.into(),
        }
    }

    pub fn openai(model_id: impl Into<String>) -> Self {
        Self::new(Backend::OpenAi, model_id)
    }

    pub fn anthropic(model_id: impl Into<String>) -> Self {
        Self::new(Backend::Anthropic, model_id)
    }

    pub fn gemini(model_id: impl Into<String>) -> Self {
        Self::new(Backend::Gemini, model_id)
    }

    pub fn model_id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn provider(&self) -> &'static str {
        self.backend.as_str()
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use.
    pub model: ChatModel,
    /// Messages in the conversation. System messages are folded into the
    /// vendor's system field by adapters that have one.
    pub messages: Vec<Message>,
    /// Sampling temperature. `None` leaves the vendor default in place.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Attribution for usage tracking.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: None,
            max_tokens: None,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Concatenated content of all system messages, if any.
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Messages excluding system messages.
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    pub(crate) fn total_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            // OpenAI / Anthropic / Gemini spellings respectively.
            Some("stop") | Some("end_turn") | Some("STOP") => FinishReason::Stop,
            Some("length") | Some("max_tokens") | Some("MAX_TOKENS") => FinishReason::Length,
            Some("content_filter") | Some("SAFETY") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// One vendor completion, normalized.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Answer text, capped at the response size limit.
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_text_joins_all_system_messages() {
        let req = ChatRequest::new(
            ChatModel::openai("gpt-4o-mini"),
            vec![
                Message::system("be brief"),
                Message::user("hi"),
                Message::system("rank things"),
            ],
            Attribution::new("test"),
        );
        assert_eq!(req.system_text().as_deref(), Some("be brief\n\nrank things"));
        assert_eq!(req.conversation().count(), 1);
    }

    #[test]
    fn finish_reason_maps_vendor_spellings() {
        assert_eq!(FinishReason::from(Some("end_turn".into())), FinishReason::Stop);
        assert_eq!(FinishReason::from(Some("MAX_TOKENS".into())), FinishReason::Length);
        assert_eq!(
            FinishReason::from(None),
            FinishReason::Unknown("none".into())
        );
    }
}
