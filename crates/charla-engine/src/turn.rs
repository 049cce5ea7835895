//! One conversation turn: load, gate, normalize, retrieve, prompt, parse,
//! transition, escalate, persist.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use charla_core::config::{AGENT_HOLD_SECS, RECENT_HISTORY_LIMIT};
use charla_core::ids::{EscalationId, MessageId};
use charla_core::message::{ChannelKey, NormalizedMessage, PlannedMessage};
use charla_core::provider::{ChatMessage, ChatRequest, Role};
use charla_core::tenant::TenantConfig;
use charla_media::pipeline::MediaOutcome;
use charla_store::types::{
    DeliveryStatus, Direction, EscalationPriority, EscalationReason, Session, SessionStatus,
    StoredMessage,
};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::prompt::{build_system_prompt, envelope, history_messages};
use crate::reply::{parse_reply, LlmReply};

/// Sent when the LLM reply could not be used at all.
const APOLOGY_TEXT: &str =
    "Disculpa, tuve un problema técnico. En un momento te atiende uno de nuestros asesores.";

/// How many accepted transitions the session context remembers.
const TRANSITION_HISTORY_LIMIT: usize = 10;

/// A transition that was validated and applied.
#[derive(Debug, Clone)]
pub struct AcceptedTransition {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// One persisted outbound message awaiting delivery by the caller.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub message_id: MessageId,
    pub message: PlannedMessage,
}

/// Everything a turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub session_id: charla_core::ids::SessionId,
    pub responses: Vec<OutboundResponse>,
    pub escalation_id: Option<EscalationId>,
    pub transition: Option<AcceptedTransition>,
    /// The turn was swallowed by the agent-hold gate.
    pub held: bool,
    /// The agent-hold gate released this turn back to the assistant.
    pub resumed: bool,
}

/// Process one normalized inbound message for a session key.
///
/// Creates the contact and session when absent, appends the inbound message,
/// and runs the full LLM turn with its side effects. Transient provider and
/// store errors bubble up so the debounce pipeline can retry; an unparseable
/// LLM reply is downgraded to the `ai_uncertainty` safety net instead.
pub async fn process_message<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    key: &ChannelKey,
    inbound: &NormalizedMessage,
    sender_name: Option<&str>,
) -> Result<TurnOutcome> {
    let stores = ctx.stores();
    let now = Utc::now();

    let machine = stores.machines.find_active(&tenant.id, &tenant.state_machine)?;
    let contact = stores.contacts.find_or_create_by_channel_user(
        &tenant.id,
        key.kind,
        &key.user_id,
        sender_name,
    )?;
    let mut session = stores
        .sessions
        .get_or_create(&tenant.id, key, &contact.id, machine.initial_state())?;

    // A user reply always cancels whatever re-engagement was queued.
    stores.followups.cancel_pending(&tenant.id, &session.id)?;

    // Agent-hold gate: while a human owns the session, the assistant stays
    // silent. It resumes only after an hour of silence AND once no active
    // escalation remains.
    let mut resumed = false;
    if session.escalated {
        let idle = now - session.last_message_at;
        let no_active = !stores.escalations.has_active(&tenant.id, &session.id)?;
        if idle >= Duration::seconds(AGENT_HOLD_SECS) && no_active {
            info!(session = %session.id, "agent hold released; resuming assistant");
            session.escalated = false;
            session.status = SessionStatus::Active;
            resumed = true;
        } else {
            let reply_to = resolve_reply_to(ctx, tenant, &session, inbound)?;
            store_inbound(ctx, tenant, &session, inbound, &MediaOutcome::default(), reply_to)?;
            session.last_message_at = now;
            stores.sessions.update(&session)?;
            return Ok(TurnOutcome {
                session_id: session.id,
                responses: Vec::new(),
                escalation_id: None,
                transition: None,
                held: true,
                resumed: false,
            });
        }
    }

    // Media normalization: fold transcription/description into the
    // LLM-visible copy; the stored message keeps the user's original content.
    let media_outcome = match (ctx.media(), inbound.kind.is_media()) {
        (Some(pipeline), true) => {
            let bearer = tenant.channel(key.kind).map(|c| c.access_token.as_str());
            pipeline
                .process(&tenant.storage_bucket, bearer, inbound)
                .await?
        }
        _ => MediaOutcome::default(),
    };
    let mut llm_msg = inbound.clone();
    if llm_msg.transcription.is_none() {
        llm_msg.transcription = media_outcome.transcription.clone();
    }
    if llm_msg.image_analysis.is_none() {
        llm_msg.image_analysis = media_outcome.image_analysis.clone();
    }

    // History is loaded before the inbound append so the current turn is not
    // duplicated in the prompt.
    let history = stores
        .messages
        .recent(&tenant.id, &session.id, RECENT_HISTORY_LIMIT)?;
    let reply_to = resolve_reply_to(ctx, tenant, &session, inbound)?;
    store_inbound(ctx, tenant, &session, inbound, &media_outcome, reply_to)?;

    // Sessions can outlive a machine redeploy; park them back at the initial
    // state instead of failing the turn.
    if machine.state(&session.current_state).is_err() {
        warn!(
            session = %session.id,
            state = %session.current_state,
            "current state missing from active machine; resetting to initial"
        );
        session.current_state = machine.initial_state().to_string();
        session.previous_state = None;
    }
    let state = machine.state(&session.current_state)?;

    let user_text = llm_msg.llm_visible_text();
    let rag = charla_rag::retrieve(
        ctx.embedder(),
        stores,
        &tenant.id,
        &user_text,
        &state.rag_categories,
        Some(&session.current_state),
    )
    .await?;

    let state_block = machine.transition_context(&session.current_state)?;
    let system = build_system_prompt(tenant, &state_block, &rag, now);
    let mut messages = history_messages(&history);
    messages.push(ChatMessage {
        role: Role::User,
        content: envelope(inbound.kind.as_str(), now, &user_text),
    });

    let request = ChatRequest {
        system: system.to_plain_text(),
        messages,
        max_tokens: 1024,
        json_mode: true,
    };
    let response = match tokio::time::timeout(ctx.llm_timeout(), ctx.llm().generate(&request)).await
    {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(EngineError::LlmTimeout {
                secs: ctx.llm_timeout().as_secs(),
            })
        }
    };

    let (mut reply, parse_failed) = match parse_reply(&response.content) {
        Ok(r) => (r, false),
        Err(e) => {
            warn!(session = %session.id, error = %e, "LLM reply unparseable; safety net engaged");
            (
                LlmReply {
                    responses: vec![PlannedMessage::text(APOLOGY_TEXT)],
                    is_uncertain: Some(true),
                    ..Default::default()
                },
                true,
            )
        }
    };

    // Transition: validate against the graph; a disallowed target drops the
    // transition but keeps the responses.
    let mut accepted: Option<AcceptedTransition> = None;
    if let Some(plan) = reply.transition.take() {
        if plan.to == session.current_state {
            // Self-loop: stays put, previous-state untouched.
        } else if machine.can_transition(&session.current_state, &plan.to) {
            record_transition(&mut session, &plan.to, &plan.reason, now);
            let from = session.current_state.clone();
            info!(
                session = %session.id,
                from = %from,
                to = %plan.to,
                confidence = plan.confidence,
                "state transition"
            );
            accepted = Some(AcceptedTransition {
                from: from.clone(),
                to: plan.to.clone(),
                reason: plan.reason,
            });
            session.previous_state = Some(from);
            session.current_state = plan.to;
        } else {
            warn!(
                session = %session.id,
                from = %session.current_state,
                to = %plan.to,
                "disallowed transition proposed; dropping"
            );
        }
    }

    // Canned entry messages for the state just entered.
    if let Some(t) = &accepted {
        let entry = stores
            .machines
            .state_entry_messages(&tenant.id, machine.name(), &t.to)?;
        reply
            .responses
            .extend(entry.into_iter().map(PlannedMessage::text));
    }

    // Escalation: explicit request from the LLM, or the uncertainty safety
    // net. Creation failures are logged and never drop the user's turn.
    let uncertain = reply.is_uncertain.unwrap_or(false) || parse_failed;
    let escalation_plan = reply.escalation.as_ref().filter(|e| e.should_escalate);
    let mut escalation_id = None;
    if (escalation_plan.is_some() || uncertain) && tenant.escalation.enabled {
        let (reason, priority, summary, confidence) = match escalation_plan {
            Some(plan) => (plan.reason(), plan.priority(), plan.summary.clone(), plan.confidence),
            None => (
                EscalationReason::AiUncertainty,
                EscalationPriority::Medium,
                if parse_failed {
                    "Assistant reply could not be parsed".to_string()
                } else {
                    "Assistant flagged low confidence".to_string()
                },
                0.0,
            ),
        };
        match stores
            .escalations
            .create(&tenant.id, &session.id, reason, priority, &summary, confidence)
        {
            Ok(id) => {
                session.escalated = true;
                session.status = SessionStatus::Paused;
                stores.followups.cancel_pending(&tenant.id, &session.id)?;
                notify_escalation(ctx, tenant, &session, reason, priority, &summary).await;
                escalation_id = Some(id);
            }
            Err(e) => error!(session = %session.id, error = %e, "escalation create failed"),
        }
    }

    // Deposit side effect.
    if let Some(deposit) = &reply.deposit_confirmed {
        stores.deposits.record(
            &tenant.id,
            &session.id,
            &contact.id,
            deposit.amount,
            &deposit.currency,
            &deposit.reasoning,
        )?;
        stores
            .contacts
            .confirm_deposit(&tenant.id, &contact.id, deposit.amount)?;
    }

    // Context updates merge shallowly: top-level keys replace.
    if let Some(updates) = reply.context_updates.take() {
        for (k, v) in updates {
            session.context.insert(k, v);
        }
    }

    // Persist outbound messages; delivery itself is the caller's concern.
    let mut responses = Vec::with_capacity(reply.responses.len());
    for planned in reply.responses {
        let msg = StoredMessage {
            id: MessageId::new(),
            tenant_id: tenant.id.clone(),
            session_id: session.id.clone(),
            direction: Direction::Outbound,
            kind: planned.kind.message_kind(),
            content: planned.content.clone(),
            media_url: None,
            transcription: None,
            image_analysis: None,
            template_name: planned.template_name.clone(),
            platform_message_id: None,
            delivery_status: DeliveryStatus::Pending,
            reply_to: None,
            created_at: Utc::now(),
        };
        stores.messages.save(&msg)?;
        responses.push(OutboundResponse {
            message_id: msg.id,
            message: planned,
        });
    }

    session.last_message_at = now;
    stores.sessions.update(&session)?;

    // Kick off the (possibly new) state's follow-up sequence. Escalated
    // sessions get none; the human owns the conversation now.
    if !session.escalated {
        let state = machine.state(&session.current_state)?;
        if !state.followup_sequence.is_empty() {
            stores.followups.schedule(
                &tenant.id,
                &session.id,
                &session.current_state,
                0,
                &state.followup_sequence,
            )?;
        }
    }

    Ok(TurnOutcome {
        session_id: session.id,
        responses,
        escalation_id,
        transition: accepted,
        held: false,
        resumed,
    })
}

/// Append the accepted transition to the session's in-context history,
/// bounded to the most recent entries.
fn record_transition(session: &mut Session, to: &str, reason: &str, at: chrono::DateTime<Utc>) {
    let entry = json!({
        "from": session.current_state,
        "to": to,
        "reason": reason,
        "at": at.to_rfc3339(),
    });
    let history = session
        .context
        .entry("recent_transitions".to_string())
        .or_insert_with(|| json!([]));
    if let Some(list) = history.as_array_mut() {
        list.push(entry);
        let excess = list.len().saturating_sub(TRANSITION_HISTORY_LIMIT);
        if excess > 0 {
            list.drain(..excess);
        }
    }
}

/// Resolve the platform reply id to a stored message in the same session.
fn resolve_reply_to<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session: &Session,
    inbound: &NormalizedMessage,
) -> Result<Option<MessageId>> {
    let Some(platform_id) = &inbound.reply_to_message_id else {
        return Ok(None);
    };
    Ok(ctx
        .stores()
        .messages
        .find_by_platform_id(&tenant.id, &session.id, platform_id)?)
}

fn store_inbound<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session: &Session,
    inbound: &NormalizedMessage,
    media: &MediaOutcome,
    reply_to: Option<MessageId>,
) -> Result<MessageId> {
    let content = inbound
        .content
        .clone()
        .or_else(|| inbound.interactive_payload.as_ref().map(|p| p.title.clone()))
        .unwrap_or_default();
    let msg = StoredMessage {
        id: MessageId::new(),
        tenant_id: tenant.id.clone(),
        session_id: session.id.clone(),
        direction: Direction::Inbound,
        kind: inbound.kind,
        content,
        media_url: media.archived_url.clone().or_else(|| inbound.media_url.clone()),
        transcription: media.transcription.clone().or_else(|| inbound.transcription.clone()),
        image_analysis: media.image_analysis.clone().or_else(|| inbound.image_analysis.clone()),
        template_name: None,
        platform_message_id: Some(inbound.id.clone()),
        delivery_status: DeliveryStatus::Delivered,
        reply_to,
        created_at: inbound.timestamp,
    };
    ctx.stores().messages.save(&msg)?;
    Ok(msg.id)
}

async fn notify_escalation<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session: &Session,
    reason: EscalationReason,
    priority: EscalationPriority,
    summary: &str,
) {
    let (Some(notifier), Some(url)) = (ctx.notifier(), tenant.escalation.notify_url.as_deref())
    else {
        return;
    };
    let payload = json!({
        "tenant": tenant.id.as_str(),
        "sessionId": session.id.as_str(),
        "channel": session.channel.to_string(),
        "reason": reason.as_str(),
        "priority": priority.as_str(),
        "summary": summary,
    });
    if let Err(e) = notifier.notify(url, payload).await {
        warn!(session = %session.id, error = %e, "escalation notification failed");
    }
}
