//! Follow-up worker behavior over an in-memory store with fake egress.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use charla_core::ids::TenantId;
use charla_core::message::{ChannelKey, ChannelKind, PlannedKind, PlannedMessage};
use charla_core::provider::{
    ChatRequest, ChatResponse, DeliveryReceipt, EmbeddingProvider, LlmProvider, OutboundChannel,
    ProviderError,
};
use charla_core::tenant::TenantConfig;
use charla_engine::EngineContext;
use charla_followup::worker::{run_pass, WORKER_LOCK_NAME};
use charla_machine::FollowupStep;
use charla_store::types::{Direction, FollowupStatus, Session};
use charla_store::Stores;

struct StaticLlm;

#[async_trait]
impl LlmProvider for StaticLlm {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        // Variable prompts run in plain mode; follow-up drafts in JSON mode.
        let content = if req.json_mode {
            r#"{"responses": [{"type": "text", "content": "¿Sigues ahí?"}]}"#.to_string()
        } else {
            "Juan".to_string()
        };
        Ok(ChatResponse {
            content,
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
    llm: StaticLlm,
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

#[derive(Default)]
struct RecordingChannel {
    sends: Mutex<Vec<(String, PlannedMessage)>>,
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn deliver(
        &self,
        recipient: &str,
        message: &PlannedMessage,
        _reply_to: Option<&str>,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let mut sends = self.sends.lock().unwrap();
        sends.push((recipient.to_string(), message.clone()));
        Ok(DeliveryReceipt {
            platform_message_id: format!("wamid.out.{}", sends.len()),
            used_fallback: false,
        })
    }
}

fn tenant(fallback: Option<&str>) -> TenantConfig {
    let mut value = serde_json::json!({
        "id": "t1",
        "name": "Acme",
        "namespace": "acme",
        "storage_bucket": "acme-media",
        "state_machine": "sales_v2"
    });
    if let Some(f) = fallback {
        value["followup_fallback_template"] = serde_json::json!(f);
    }
    serde_json::from_value(value).unwrap()
}

fn ctx() -> TestCtx {
    let stores = Stores::open_in_memory().unwrap();
    let def: charla_machine::StateMachineDef = serde_json::from_value(serde_json::json!({
        "name": "sales_v2",
        "initialState": "greeting",
        "states": {
            "greeting": {"objective": "hi", "allowedTransitions": ["pitching_12x"]},
            "pitching_12x": {
                "objective": "pitch",
                "allowedTransitions": [],
                "followupSequence": [
                    {"interval": "0s", "config": "nudge"},
                    {"interval": "0s"}
                ]
            }
        }
    }))
    .unwrap();
    stores.machines.save(&TenantId::from("t1"), &def, true).unwrap();
    TestCtx {
        stores,
        llm: StaticLlm,
        embedder: NullEmbedder,
    }
}

fn seed_session(stores: &Stores) -> Session {
    let tenant_id = TenantId::from("t1");
    let contact = stores
        .contacts
        .find_or_create_by_channel_user(&tenant_id, ChannelKind::Whatsapp, "5215550001", Some("Juan Pérez"))
        .unwrap();
    let key = ChannelKey::new(ChannelKind::Whatsapp, "pn_1", "5215550001");
    let mut session = stores
        .sessions
        .get_or_create(&tenant_id, &key, &contact.id, "pitching_12x")
        .unwrap();
    session.context.insert("customer_name".into(), serde_json::json!("Juan"));
    stores.sessions.update(&session).unwrap();
    session
}

fn steps() -> Vec<FollowupStep> {
    vec![
        FollowupStep {
            interval: "0s".into(),
            config: Some("nudge".into()),
        },
        FollowupStep {
            interval: "0s".into(),
            config: None,
        },
    ]
}

fn seed_nudge_config(stores: &Stores) {
    let cfg: charla_store::types::FollowupConfig = serde_json::from_value(serde_json::json!({
        "name": "nudge",
        "type": "text",
        "body": "Hola {{name}}, ¿seguimos?",
        "variables": [{"key": "name", "type": "context", "field": "customer_name"}]
    }))
    .unwrap();
    stores.machines.set_followup_config(&TenantId::from("t1"), &cfg).unwrap();
}

#[tokio::test]
async fn registered_config_renders_delivers_and_chains() {
    let ctx = ctx();
    let tenant = tenant(None);
    let session = seed_session(&ctx.stores);
    seed_nudge_config(&ctx.stores);
    ctx.stores
        .followups
        .schedule(&tenant.id, &session.id, "pitching_12x", 0, &steps())
        .unwrap()
        .unwrap();

    let channel = Arc::new(RecordingChannel::default());
    let channel2 = Arc::clone(&channel);
    let stats = run_pass(
        &ctx,
        &[tenant.clone()],
        move |_| Some(channel2.clone() as Arc<dyn OutboundChannel>),
        StdDuration::from_secs(60),
    )
    .await
    .unwrap();

    assert!(!stats.skipped);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 0);

    // Variable resolved from context, body substituted, recipient correct.
    let sends = channel.sends.lock().unwrap();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].0, "5215550001");
    assert_eq!(sends[0].1.content, "Hola Juan, ¿seguimos?");

    // Outbound message persisted with the platform id.
    let msgs = ctx.stores.messages.recent(&tenant.id, &session.id, 10).unwrap();
    let outbound: Vec<_> = msgs.iter().filter(|m| m.direction == Direction::Outbound).collect();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].platform_message_id.as_deref(), Some("wamid.out.1"));

    // Index 1 (the dynamic step) is queued next.
    let due = ctx
        .stores
        .followups
        .due_for_tenant(&tenant.id, Utc::now() + Duration::seconds(5))
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].sequence_index, 1);
    assert!(due[0].config_name.is_none());
}

#[tokio::test]
async fn dynamic_step_uses_generated_draft() {
    let ctx = ctx();
    let tenant = tenant(None);
    let session = seed_session(&ctx.stores);
    ctx.stores
        .followups
        .schedule(&tenant.id, &session.id, "pitching_12x", 1, &steps())
        .unwrap()
        .unwrap();

    let channel = Arc::new(RecordingChannel::default());
    let channel2 = Arc::clone(&channel);
    let stats = run_pass(
        &ctx,
        &[tenant.clone()],
        move |_| Some(channel2.clone() as Arc<dyn OutboundChannel>),
        StdDuration::from_secs(60),
    )
    .await
    .unwrap();

    assert_eq!(stats.sent, 1);
    let sends = channel.sends.lock().unwrap();
    assert_eq!(sends[0].1.content, "¿Sigues ahí?");

    // Index 2 is past the end of the sequence: nothing further queued.
    assert!(ctx
        .stores
        .followups
        .due_for_tenant(&tenant.id, Utc::now() + Duration::seconds(5))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn closed_window_forces_fallback_template() {
    let ctx = ctx();
    let tenant = tenant(Some("reengage_generic"));
    let mut session = seed_session(&ctx.stores);
    session.last_message_at = Utc::now() - Duration::hours(26);
    ctx.stores.sessions.update(&session).unwrap();
    seed_nudge_config(&ctx.stores);
    ctx.stores
        .followups
        .schedule(&tenant.id, &session.id, "pitching_12x", 0, &steps())
        .unwrap()
        .unwrap();

    let channel = Arc::new(RecordingChannel::default());
    let channel2 = Arc::clone(&channel);
    let stats = run_pass(
        &ctx,
        &[tenant.clone()],
        move |_| Some(channel2.clone() as Arc<dyn OutboundChannel>),
        StdDuration::from_secs(60),
    )
    .await
    .unwrap();

    assert_eq!(stats.sent, 1);
    let sends = channel.sends.lock().unwrap();
    assert_eq!(sends[0].1.kind, PlannedKind::Template);
    assert_eq!(sends[0].1.template_name.as_deref(), Some("reengage_generic"));
    // The rendered text rides along as fallback content.
    assert_eq!(sends[0].1.content, "Hola Juan, ¿seguimos?");
}

#[tokio::test]
async fn closed_window_without_fallback_marks_failed() {
    let ctx = ctx();
    let tenant = tenant(None);
    let mut session = seed_session(&ctx.stores);
    session.last_message_at = Utc::now() - Duration::hours(26);
    ctx.stores.sessions.update(&session).unwrap();
    seed_nudge_config(&ctx.stores);
    let item_id = ctx
        .stores
        .followups
        .schedule(&tenant.id, &session.id, "pitching_12x", 0, &steps())
        .unwrap()
        .unwrap();

    let channel = Arc::new(RecordingChannel::default());
    let channel2 = Arc::clone(&channel);
    let stats = run_pass(
        &ctx,
        &[tenant.clone()],
        move |_| Some(channel2.clone() as Arc<dyn OutboundChannel>),
        StdDuration::from_secs(60),
    )
    .await
    .unwrap();

    assert_eq!(stats.sent, 0);
    assert_eq!(stats.failed, 1);
    assert!(channel.sends.lock().unwrap().is_empty());
    let item = ctx.stores.followups.find_by_id(&item_id).unwrap().unwrap();
    assert_eq!(item.status, FollowupStatus::Failed);
    assert!(item.last_error.as_deref().unwrap().contains("fallback"));
}

#[tokio::test]
async fn held_lock_skips_the_pass() {
    let ctx = ctx();
    let tenant = tenant(None);
    let session = seed_session(&ctx.stores);
    ctx.stores
        .followups
        .schedule(&tenant.id, &session.id, "pitching_12x", 0, &steps())
        .unwrap()
        .unwrap();
    // Another instance holds the singleton lock.
    assert!(ctx
        .stores
        .locks
        .try_acquire(WORKER_LOCK_NAME, Duration::seconds(60))
        .unwrap());

    let channel = Arc::new(RecordingChannel::default());
    let channel2 = Arc::clone(&channel);
    let stats = run_pass(
        &ctx,
        &[tenant],
        move |_| Some(channel2.clone() as Arc<dyn OutboundChannel>),
        StdDuration::from_secs(60),
    )
    .await
    .unwrap();

    assert!(stats.skipped);
    assert_eq!(stats.sent, 0);
    assert!(channel.sends.lock().unwrap().is_empty());
}
