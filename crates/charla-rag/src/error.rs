use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(#[from] charla_core::provider::ProviderError),

    #[error("store error: {0}")]
    Store(#[from] charla_store::StoreError),
}

pub type Result<T> = std::result::Result<T, RagError>;
