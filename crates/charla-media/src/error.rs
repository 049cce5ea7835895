use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("blob storage error: {0}")]
    Blob(#[from] std::io::Error),

    #[error("provider error: {0}")]
    Provider(#[from] charla_core::provider::ProviderError),
}

pub type Result<T> = std::result::Result<T, MediaError>;
