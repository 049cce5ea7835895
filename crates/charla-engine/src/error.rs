use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] charla_store::StoreError),

    #[error("state machine error: {0}")]
    Machine(#[from] charla_machine::MachineError),

    #[error("retrieval error: {0}")]
    Rag(#[from] charla_rag::RagError),

    #[error("media error: {0}")]
    Media(#[from] charla_media::MediaError),

    #[error("LLM provider error: {0}")]
    Provider(#[from] charla_core::provider::ProviderError),

    #[error("LLM call timed out after {secs}s")]
    LlmTimeout { secs: u64 },

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
