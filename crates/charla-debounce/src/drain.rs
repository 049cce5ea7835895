//! Claim-and-drain: turn a matured buffer session into one engine turn.

use thiserror::Error;
use tracing::{info, warn};

use charla_core::tenant::TenantConfig;
use charla_engine::{process_message, EngineContext, TurnOutcome};

use crate::aggregate::aggregate;

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("store error: {0}")]
    Store(#[from] charla_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] charla_engine::EngineError),
}

/// Drain every buffered message of one session as a single logical turn.
///
/// Returns `Ok(None)` when the claim was lost (another worker holds the
/// session) or the buffer turned out to be empty. On engine failure the rows
/// are released for retry and the error propagates.
pub async fn process_pending<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session_key_hash: &str,
) -> Result<Option<TurnOutcome>, DrainError> {
    let stores = ctx.stores();
    if !stores.buffer.claim_session(session_key_hash)? {
        return Ok(None);
    }

    let rows = stores.buffer.get_by_session(session_key_hash)?;
    let Some(synthetic) = aggregate(&rows) else {
        return Ok(None);
    };
    let key = rows[0].channel.clone();
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

    info!(
        tenant = %tenant.id,
        hash = %session_key_hash,
        burst = rows.len(),
        "draining buffered session"
    );

    match process_message(ctx, tenant, &key, &synthetic, None).await {
        Ok(outcome) => {
            stores.buffer.delete_by_ids(&ids)?;
            Ok(Some(outcome))
        }
        Err(e) => {
            warn!(hash = %session_key_hash, error = %e, "drain failed; releasing claim for retry");
            stores.buffer.mark_for_retry(session_key_hash, &e.to_string())?;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use charla_core::ids::TenantId;
    use chrono::{Duration, Utc};
    use charla_core::message::{ChannelKey, ChannelKind, MessageKind, NormalizedMessage};
    use charla_core::provider::{
        ChatRequest, ChatResponse, EmbeddingProvider, LlmProvider, ProviderError,
    };
    use charla_store::Stores;
    use std::sync::Mutex;

    /// Echoes the user's latest content back so tests can observe what the
    /// engine saw; optionally fails a scripted number of times first.
    struct EchoLlm {
        fail_times: Mutex<u32>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            {
                let mut failures = self.fail_times.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ProviderError::Unavailable("scripted outage".into()));
                }
            }
            let last_user = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push(last_user);
            Ok(ChatResponse {
                content: r#"{"responses": [{"type": "text", "content": "ok"}]}"#.into(),
                tokens_in: 10,
                tokens_out: 5,
                finish_reason: "stop".into(),
            })
        }
    }

    struct NullEmbedder;

    #[async_trait]
    impl EmbeddingProvider for NullEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0])
        }
    }

    struct TestCtx {
        stores: Stores,
        llm: EchoLlm,
        embedder: NullEmbedder,
    }

    impl EngineContext for TestCtx {
        fn stores(&self) -> &Stores {
            &self.stores
        }
        fn llm(&self) -> &dyn LlmProvider {
            &self.llm
        }
        fn embedder(&self) -> &dyn EmbeddingProvider {
            &self.embedder
        }
    }

    fn tenant() -> TenantConfig {
        serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "Acme",
            "namespace": "acme",
            "storage_bucket": "acme-media",
            "state_machine": "sales_v2"
        }))
        .unwrap()
    }

    fn ctx(fail_times: u32) -> TestCtx {
        let stores = Stores::open_in_memory().unwrap();
        let def: charla_machine::StateMachineDef = serde_json::from_value(serde_json::json!({
            "name": "sales_v2",
            "initialState": "greeting",
            "states": {"greeting": {"objective": "hi", "allowedTransitions": []}}
        }))
        .unwrap();
        stores.machines.save(&TenantId::from("t1"), &def, true).unwrap();
        TestCtx {
            stores,
            llm: EchoLlm {
                fail_times: Mutex::new(fail_times),
                seen: Mutex::new(Vec::new()),
            },
            embedder: NullEmbedder,
        }
    }

    fn seed_burst(stores: &Stores, texts: &[&str]) -> (ChannelKey, String) {
        let key = ChannelKey::new(ChannelKind::Whatsapp, "pn_1", "5215550001");
        let hash = crate::session_key_hash(&key);
        for (i, text) in texts.iter().enumerate() {
            let msg = NormalizedMessage {
                id: format!("wamid.{i}"),
                timestamp: Utc::now(),
                kind: MessageKind::Text,
                content: Some(text.to_string()),
                media_url: None,
                transcription: None,
                image_analysis: None,
                interactive_payload: None,
                reply_to_message_id: None,
            };
            stores
                .buffer
                .add(&TenantId::from("t1"), &hash, &key, &msg, Utc::now() - Duration::seconds(1))
                .unwrap();
        }
        (key, hash)
    }

    #[tokio::test]
    async fn burst_drains_as_one_ordered_turn() {
        let ctx = ctx(0);
        let (_key, hash) = seed_burst(&ctx.stores, &["hola", "soy juan", "cuanto cuesta?"]);

        let outcome = process_pending(&ctx, &tenant(), &hash).await.unwrap().unwrap();
        assert_eq!(outcome.responses.len(), 1);

        // The engine saw exactly one aggregated turn, in received order.
        let seen = ctx.llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].ends_with("hola\nsoy juan\ncuanto cuesta?"));

        // All buffer rows are gone.
        assert!(ctx.stores.buffer.get_by_session(&hash).unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_claim_returns_none() {
        let ctx = ctx(0);
        let (_key, hash) = seed_burst(&ctx.stores, &["hola"]);
        assert!(ctx.stores.buffer.claim_session(&hash).unwrap());

        let result = process_pending(&ctx, &tenant(), &hash).await.unwrap();
        assert!(result.is_none());
        // Rows untouched under the competing claim.
        assert_eq!(ctx.stores.buffer.get_by_session(&hash).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_releases_claim_and_counts_retry() {
        let ctx = ctx(1);
        let (_key, hash) = seed_burst(&ctx.stores, &["hola"]);

        let err = process_pending(&ctx, &tenant(), &hash).await;
        assert!(err.is_err());

        let rows = ctx.stores.buffer.get_by_session(&hash).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].retry_count, 1);
        assert!(rows[0].processing_started_at.is_none());
        assert!(rows[0].last_error.as_deref().unwrap().contains("outage"));

        // Next pass succeeds and clears the buffer.
        let outcome = process_pending(&ctx, &tenant(), &hash).await.unwrap();
        assert!(outcome.is_some());
        assert!(ctx.stores.buffer.get_by_session(&hash).unwrap().is_empty());
    }

}
