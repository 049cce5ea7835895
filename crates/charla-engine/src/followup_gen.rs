//! LLM-generated follow-ups: the dynamic fallback used when a queue item has
//! no registered config, and single-value generation for `llm`-typed
//! variables in registered configs.

use chrono::Utc;
use tracing::warn;

use charla_core::config::RECENT_HISTORY_LIMIT;
use charla_core::ids::SessionId;
use charla_core::message::PlannedMessage;
use charla_core::provider::{ChatMessage, ChatRequest, Role};
use charla_core::tenant::TenantConfig;
use charla_rag::RagContext;

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::prompt::{build_system_prompt, history_messages};
use crate::reply::parse_reply;

/// A generated follow-up: the messages to send and the state they were
/// generated for.
#[derive(Debug)]
pub struct FollowupDraft {
    pub responses: Vec<PlannedMessage>,
    pub state: String,
}

/// Generate a re-engagement message for a silent session.
pub async fn generate_followup<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session_id: &SessionId,
) -> Result<FollowupDraft> {
    let stores = ctx.stores();
    let session = stores
        .sessions
        .find_by_id(&tenant.id, session_id)?
        .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
    let machine = stores.machines.find_active(&tenant.id, &tenant.state_machine)?;
    let state_block = machine
        .transition_context(&session.current_state)
        .unwrap_or_default();

    let history = stores
        .messages
        .recent(&tenant.id, &session.id, RECENT_HISTORY_LIMIT)?;
    let system = build_system_prompt(tenant, &state_block, &RagContext::default(), Utc::now());

    let mut messages = history_messages(&history);
    messages.push(ChatMessage {
        role: Role::User,
        content: "[system] The customer has gone quiet. Write one short, friendly \
                  re-engagement message that moves the current state's objective forward. \
                  Do not repeat earlier messages. Reply with the usual JSON object; \
                  no transition, no escalation."
            .to_string(),
    });

    let request = ChatRequest {
        system: system.to_plain_text(),
        messages,
        max_tokens: 512,
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

    let reply = parse_reply(&response.content).map_err(|e| {
        warn!(session = %session_id, error = %e, "follow-up generation unparseable");
        charla_core::provider::ProviderError::Parse(e.to_string())
    })?;

    Ok(FollowupDraft {
        responses: reply.responses,
        state: session.current_state,
    })
}

/// Resolve an `llm`-typed variable of a follow-up config to a plain value.
pub async fn generate_followup_variable<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session_id: &SessionId,
    prompt: &str,
) -> Result<String> {
    let stores = ctx.stores();
    let session = stores
        .sessions
        .find_by_id(&tenant.id, session_id)?
        .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
    let history = stores.messages.recent(&tenant.id, &session.id, RECENT_HISTORY_LIMIT)?;

    let mut transcript = String::new();
    for msg in history_messages(&history) {
        let speaker = match msg.role {
            Role::User => "customer",
            Role::Assistant => "assistant",
        };
        transcript.push_str(&format!("{speaker}: {}\n", msg.content));
    }

    let request = ChatRequest {
        system: "You fill a single template variable for an outbound message. \
                 Reply with the bare value only: no quotes, no JSON, no explanation."
            .to_string(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: format!("Conversation so far:\n{transcript}\n{prompt}"),
        }],
        max_tokens: 128,
        json_mode: false,
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

    Ok(response.content.trim().trim_matches('"').to_string())
}
