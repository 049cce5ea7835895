//! Host context consumed by the engine — shared by the gateway's `AppState`
//! and by test fixtures.

use std::time::Duration;

use charla_core::config::LLM_TIMEOUT_SECS;
use charla_core::provider::{EmbeddingProvider, LlmProvider, Notifier};
use charla_media::MediaPipeline;
use charla_store::Stores;

/// Accessors for everything a turn needs. Implemented by the gateway's
/// `AppState` in production and by in-memory fixtures in tests.
pub trait EngineContext: Send + Sync {
    fn stores(&self) -> &Stores;

    fn llm(&self) -> &dyn LlmProvider;

    fn embedder(&self) -> &dyn EmbeddingProvider;

    /// Media pipeline; `None` disables transcription/vision (media messages
    /// then reach the LLM as bare attachments).
    fn media(&self) -> Option<&MediaPipeline> {
        None
    }

    /// Escalation notification sink; `None` disables notifications.
    fn notifier(&self) -> Option<&dyn Notifier> {
        None
    }

    fn llm_timeout(&self) -> Duration {
        Duration::from_secs(LLM_TIMEOUT_SECS)
    }
}
