use thiserror::Error;

#[derive(Debug, Error)]
pub enum CharlaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tenant not found for channel {channel_id}")]
    TenantNotFound { channel_id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Webhook signature rejected: {0}")]
    SignatureRejected(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CharlaError>;
