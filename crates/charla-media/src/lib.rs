//! Inbound media handling: download from the channel, archive to blob
//! storage, and produce LLM-visible text (transcription or description).

pub mod blob;
pub mod error;
pub mod pipeline;

pub use blob::{BlobStore, FsBlobStore};
pub use error::MediaError;
pub use pipeline::MediaPipeline;
