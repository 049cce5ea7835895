//! Injectable provider seams: LLM, embeddings, transcription, vision,
//! outbound channel delivery, and escalation notification.
//!
//! Concrete LLM/transcription/vision implementations are host concerns and
//! are injected at wiring time; the engine and workers only ever see these
//! traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::PlannedMessage;

/// A single message in the conversation history sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    /// Ask the provider to constrain output to a JSON object.
    pub json_mode: bool,
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub finish_reason: String,
}

/// Common interface for all LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for the full response.
    async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Text → vector embedding, used for knowledge and example retrieval.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Audio transcription (voice notes).
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media_url: &str) -> Result<String, ProviderError>;
}

/// Image description for inbound photos (receipts, screenshots).
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(&self, media_url: &str) -> Result<String, ProviderError>;
}

/// Receipt for one delivered outbound message.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Platform-assigned message id.
    pub platform_message_id: String,
    /// Whether the template path failed and the plain-text fallback was used.
    pub used_fallback: bool,
}

/// Outbound delivery to a channel endpoint. Implemented by the WhatsApp
/// Cloud-API client; one value per (tenant, channel) pair.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Deliver one planned message to `recipient`, optionally threading it as
    /// a reply to a platform message id.
    async fn deliver(
        &self,
        recipient: &str,
        message: &PlannedMessage,
        reply_to: Option<&str>,
    ) -> Result<DeliveryReceipt, ProviderError>;
}

/// Escalation notification sink (ops webhook). Failures are logged by the
/// caller and never fail the user's turn.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &str, payload: serde_json::Value) -> Result<(), ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation timed out")]
    Timeout,
}
