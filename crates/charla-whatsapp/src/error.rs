use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Cloud API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WhatsAppError>;
