//! End-to-end turn behavior over an in-memory store with scripted providers.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use charla_core::ids::TenantId;
use charla_core::message::{ChannelKey, ChannelKind, MessageKind, NormalizedMessage, PlannedKind};
use charla_core::provider::{
    ChatRequest, ChatResponse, EmbeddingProvider, LlmProvider, Notifier, ProviderError,
};
use charla_core::tenant::TenantConfig;
use charla_engine::{process_message, EngineContext};
use charla_machine::StateMachineDef;
use charla_store::types::{Direction, EscalationStatus, FollowupStatus, SessionStatus};
use charla_store::Stores;

struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| r#"{"responses": []}"#.to_string());
        Ok(ChatResponse {
            content,
            tokens_in: 100,
            tokens_out: 50,
            finish_reason: "stop".into(),
        })
    }
}

struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(vec![1.0, 0.0])
    }
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &str, payload: serde_json::Value) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push((target.to_string(), payload));
        Ok(())
    }
}

struct TestCtx {
    stores: Stores,
    llm: ScriptedLlm,
    embedder: FixedEmbedder,
    notifier: RecordingNotifier,
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

    fn notifier(&self) -> Option<&dyn Notifier> {
        Some(&self.notifier)
    }
}

fn tenant() -> TenantConfig {
    serde_json::from_value(serde_json::json!({
        "id": "t1",
        "name": "Acme",
        "namespace": "acme",
        "storage_bucket": "acme-media",
        "state_machine": "sales_v2",
        "escalation": {"enabled": true, "notify_url": "https://ops.example/escalations"},
        "business": {"display_name": "Acme", "language": "es-MX"}
    }))
    .unwrap()
}

fn machine_def() -> StateMachineDef {
    serde_json::from_value(serde_json::json!({
        "name": "sales_v2",
        "version": 1,
        "initialState": "greeting",
        "states": {
            "greeting": {
                "objective": "Welcome and qualify",
                "allowedTransitions": ["pitching_12x"],
                "ragCategories": ["onboarding"]
            },
            "pitching_12x": {
                "objective": "Present the 12x plan",
                "allowedTransitions": ["closing"],
                "followupSequence": [
                    {"interval": "2h", "config": "nudge_price"},
                    {"interval": "1d"}
                ]
            },
            "closing": {
                "objective": "Confirm payment",
                "allowedTransitions": []
            }
        }
    }))
    .unwrap()
}

fn ctx_with(replies: &[&str]) -> TestCtx {
    let stores = Stores::open_in_memory().unwrap();
    stores
        .machines
        .save(&TenantId::from("t1"), &machine_def(), true)
        .unwrap();
    TestCtx {
        stores,
        llm: ScriptedLlm::new(replies),
        embedder: FixedEmbedder,
        notifier: RecordingNotifier::default(),
    }
}

fn key() -> ChannelKey {
    ChannelKey::new(ChannelKind::Whatsapp, "pn_1", "5215550001")
}

fn inbound(id: &str, text: &str) -> NormalizedMessage {
    NormalizedMessage {
        id: id.to_string(),
        timestamp: Utc::now(),
        kind: MessageKind::Text,
        content: Some(text.to_string()),
        media_url: None,
        transcription: None,
        image_analysis: None,
        interactive_payload: None,
        reply_to_message_id: None,
    }
}

#[tokio::test]
async fn happy_path_creates_session_and_transitions() {
    let ctx = ctx_with(&[r#"{
        "responses": [{"type": "text", "content": "¡Hola!"}],
        "transition": {"to": "pitching_12x", "reason": "interest", "confidence": 0.9}
    }"#]);
    let tenant = tenant();

    let outcome = process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "hola"), Some("Juan"))
        .await
        .unwrap();

    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(outcome.responses[0].message.content, "¡Hola!");
    let t = outcome.transition.unwrap();
    assert_eq!(t.from, "greeting");
    assert_eq!(t.to, "pitching_12x");

    let session = ctx
        .stores
        .sessions
        .find_by_key(&tenant.id, &key())
        .unwrap()
        .unwrap();
    assert_eq!(session.current_state, "pitching_12x");
    assert_eq!(session.previous_state.as_deref(), Some("greeting"));
    assert_eq!(session.status, SessionStatus::Active);

    // One inbound + one outbound persisted.
    let msgs = ctx.stores.messages.recent(&tenant.id, &session.id, 10).unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].direction, Direction::Inbound);
    assert_eq!(msgs[0].content, "hola");
    assert_eq!(msgs[1].direction, Direction::Outbound);

    // Landing in pitching_12x starts its follow-up sequence at index 0.
    let due = ctx
        .stores
        .followups
        .due_for_tenant(&tenant.id, Utc::now() + Duration::days(1))
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].sequence_index, 0);
    assert_eq!(due[0].config_name.as_deref(), Some("nudge_price"));
}

#[tokio::test]
async fn explicit_escalation_pauses_session_and_notifies() {
    let ctx = ctx_with(&[r#"{
        "responses": [{"type": "text", "content": "Te conecto con un asesor."}],
        "escalation": {"shouldEscalate": true, "reason": "explicit_request",
                       "confidence": 0.95, "summary": "User wants human", "priority": "high"}
    }"#]);
    let tenant = tenant();

    let outcome = process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "quiero hablar con un humano"), None)
        .await
        .unwrap();

    let escalation_id = outcome.escalation_id.expect("escalation created");
    let escalation = ctx
        .stores
        .escalations
        .find_by_id(&tenant.id, &escalation_id)
        .unwrap()
        .unwrap();
    assert_eq!(escalation.status, EscalationStatus::Open);
    assert_eq!(escalation.ai_summary, "User wants human");

    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    assert!(session.escalated);
    assert_eq!(session.status, SessionStatus::Paused);

    let calls = ctx.notifier.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://ops.example/escalations");
    assert_eq!(calls[0].1["reason"], "explicit_request");

    // Responses still go out alongside the escalation.
    assert_eq!(outcome.responses.len(), 1);
}

#[tokio::test]
async fn invalid_json_engages_safety_net() {
    let ctx = ctx_with(&["I refuse to answer in JSON today."]);
    let tenant = tenant();

    let outcome = process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "hola"), None)
        .await
        .unwrap();

    // Exactly one apology text, one ai_uncertainty escalation, session paused.
    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(outcome.responses[0].message.kind, PlannedKind::Text);
    let escalation_id = outcome.escalation_id.expect("safety-net escalation");
    let escalation = ctx
        .stores
        .escalations
        .find_by_id(&tenant.id, &escalation_id)
        .unwrap()
        .unwrap();
    assert_eq!(escalation.reason.as_str(), "ai_uncertainty");

    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(session.escalated);
}

#[tokio::test]
async fn disallowed_transition_is_dropped() {
    let ctx = ctx_with(&[r#"{
        "responses": [{"type": "text", "content": "ok"}],
        "transition": {"to": "closing", "reason": "skip ahead", "confidence": 0.8}
    }"#]);
    let tenant = tenant();

    // greeting → closing is not in the graph.
    let outcome = process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "hola"), None)
        .await
        .unwrap();

    assert!(outcome.transition.is_none());
    assert_eq!(outcome.responses.len(), 1);
    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    assert_eq!(session.current_state, "greeting");
    assert!(session.previous_state.is_none());
}

#[tokio::test]
async fn agent_hold_swallows_turn_while_escalation_active() {
    let ctx = ctx_with(&[
        r#"{"responses": [{"type": "text", "content": "Te conecto."}],
            "escalation": {"shouldEscalate": true, "reason": "explicit_request",
                           "confidence": 0.9, "summary": "human"}}"#,
    ]);
    let tenant = tenant();

    process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "humano por favor"), None)
        .await
        .unwrap();

    // Next inbound while escalated and recent: held, zero responses.
    let outcome = process_message(&ctx, &tenant, &key(), &inbound("wamid.2", "sigues ahi?"), None)
        .await
        .unwrap();
    assert!(outcome.held);
    assert!(outcome.responses.is_empty());

    // The held inbound is still persisted.
    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    let msgs = ctx.stores.messages.recent(&tenant.id, &session.id, 10).unwrap();
    assert_eq!(msgs.iter().filter(|m| m.direction == Direction::Inbound).count(), 2);
}

#[tokio::test]
async fn agent_hold_releases_after_idle_hour_without_active_escalation() {
    let ctx = ctx_with(&[r#"{"responses": [{"type": "text", "content": "¡Bienvenido de vuelta!"}]}"#]);
    let tenant = tenant();

    // Manually park the session in escalated state, 2 h idle, no escalation row.
    let contact = ctx
        .stores
        .contacts
        .find_or_create_by_channel_user(&tenant.id, ChannelKind::Whatsapp, "5215550001", None)
        .unwrap();
    let mut session = ctx
        .stores
        .sessions
        .get_or_create(&tenant.id, &key(), &contact.id, "greeting")
        .unwrap();
    session.escalated = true;
    session.status = SessionStatus::Paused;
    session.last_message_at = Utc::now() - Duration::hours(2);
    ctx.stores.sessions.update(&session).unwrap();

    let outcome = process_message(&ctx, &tenant, &key(), &inbound("wamid.9", "hola de nuevo"), None)
        .await
        .unwrap();

    assert!(outcome.resumed);
    assert!(!outcome.held);
    assert_eq!(outcome.responses.len(), 1);
    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    assert!(!session.escalated);
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn deposit_confirmation_records_event_and_flags_contact() {
    let ctx = ctx_with(&[r#"{
        "responses": [{"type": "text", "content": "¡Gracias por tu pago!"}],
        "depositConfirmed": {"amount": 500, "currency": "MXN", "reasoning": "receipt photo"}
    }"#]);
    let tenant = tenant();

    process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "ya pagué"), None)
        .await
        .unwrap();

    let contact = ctx
        .stores
        .contacts
        .find_by_channel_user(&tenant.id, ChannelKind::Whatsapp, "5215550001")
        .unwrap()
        .unwrap();
    assert!(contact.deposit_confirmed);
    assert_eq!(contact.lifetime_value, 500.0);

    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    let events = ctx.stores.deposits.for_session(&tenant.id, &session.id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].amount, 500.0);
    assert_eq!(events[0].reasoning, "receipt photo");
}

#[tokio::test]
async fn context_updates_merge_shallowly() {
    let ctx = ctx_with(&[
        r#"{"responses": [], "contextUpdates": {"plan": "12x", "budget": {"max": 1000}}}"#,
        r#"{"responses": [], "contextUpdates": {"budget": {"min": 200}}}"#,
    ]);
    let tenant = tenant();

    process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "a"), None).await.unwrap();
    process_message(&ctx, &tenant, &key(), &inbound("wamid.2", "b"), None).await.unwrap();

    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    assert_eq!(session.context["plan"], "12x");
    // Shallow merge: the second budget object replaces the first wholesale.
    assert_eq!(session.context["budget"], serde_json::json!({"min": 200}));
}

#[tokio::test]
async fn inbound_reply_cancels_pending_followups() {
    let ctx = ctx_with(&[
        r#"{"responses": [{"type": "text", "content": "plan"}],
            "transition": {"to": "pitching_12x", "reason": "interest", "confidence": 0.9}}"#,
        r#"{"responses": [{"type": "text", "content": "sigo aqui"}]}"#,
    ]);
    let tenant = tenant();

    process_message(&ctx, &tenant, &key(), &inbound("wamid.1", "hola"), None).await.unwrap();
    let session = ctx.stores.sessions.find_by_key(&tenant.id, &key()).unwrap().unwrap();
    let horizon = Utc::now() + Duration::days(2);
    assert_eq!(ctx.stores.followups.due_for_tenant(&tenant.id, horizon).unwrap().len(), 1);

    // The user replies: the pending item is cancelled, and the turn (still in
    // pitching_12x) schedules a fresh index-0 item.
    process_message(&ctx, &tenant, &key(), &inbound("wamid.2", "dame un momento"), None)
        .await
        .unwrap();
    let due = ctx.stores.followups.due_for_tenant(&tenant.id, horizon).unwrap();
    assert_eq!(due.len(), 1);
    let all_cancelled_or_pending: Vec<FollowupStatus> = due.iter().map(|i| i.status).collect();
    assert_eq!(all_cancelled_or_pending, vec![FollowupStatus::Pending]);
}
