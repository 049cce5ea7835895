use thiserror::Error;

#[derive(Debug, Error)]
pub enum FollowupError {
    #[error("store error: {0}")]
    Store(#[from] charla_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] charla_engine::EngineError),

    #[error("delivery error: {0}")]
    Delivery(#[from] charla_core::provider::ProviderError),

    #[error("session {0} no longer exists")]
    SessionGone(String),

    #[error("follow-up config '{0}' not found")]
    MissingConfig(String),

    #[error("24h window closed and tenant has no fallback template")]
    NoFallbackTemplate,

    #[error("tenant has no outbound channel for this session")]
    NoOutboundChannel,
}

pub type Result<T> = std::result::Result<T, FollowupError>;
