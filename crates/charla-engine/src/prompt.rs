//! System-prompt assembly for a conversation turn.
//!
//! Three tiers, flattened front-to-back: the static tier (tenant identity +
//! response contract) is identical for every turn of a tenant, the context
//! tier (state block + retrieved knowledge/examples) changes per state and
//! query, and the volatile tier (timestamps, session facts) changes every
//! turn and therefore goes last.

use chrono::{DateTime, Utc};

use charla_core::provider::{ChatMessage, Role};
use charla_core::tenant::TenantConfig;
use charla_rag::RagContext;
use charla_store::types::{Direction, StoredMessage};

/// The JSON shape the LLM must return. Kept verbatim in one place so the
/// parser in `reply.rs` and the instructions never drift apart.
const RESPONSE_CONTRACT: &str = r#"## Response format
Reply with a single JSON object and nothing else:
{
  "responses": [{"type": "text" | "template" | "image" | "video", "content": string,
                 "templateName"?: string, "templateParams"?: string[], "delayMs"?: number}],
  "transition"?: {"to": string, "reason": string, "confidence": number},
  "escalation"?: {"shouldEscalate": boolean,
                  "reason": "explicit_request" | "ai_uncertainty" | "repeated_failure" | "policy_violation",
                  "confidence": number, "summary": string,
                  "priority"?: "low" | "medium" | "high" | "urgent"},
  "isUncertain"?: boolean,
  "contextUpdates"?: object,
  "depositConfirmed"?: {"amount": number, "currency": string, "reasoning": string}
}
Only propose a transition listed under "Allowed transitions". Set "isUncertain"
to true whenever you are not confident the reply is correct."#;

#[derive(Debug, Clone)]
pub struct SystemPrompt {
    pub static_tier: String,
    pub context_tier: String,
    pub volatile_tier: String,
}

impl SystemPrompt {
    pub fn to_plain_text(&self) -> String {
        let mut out = self.static_tier.clone();
        for tier in [&self.context_tier, &self.volatile_tier] {
            if !tier.is_empty() {
                out.push_str("\n\n");
                out.push_str(tier);
            }
        }
        out
    }
}

/// Assemble the system prompt for one turn.
pub fn build_system_prompt(
    tenant: &TenantConfig,
    state_block: &str,
    rag: &RagContext,
    now: DateTime<Utc>,
) -> SystemPrompt {
    let business = &tenant.business;
    let mut static_tier = String::new();
    static_tier.push_str(&format!(
        "You are the conversational sales and support assistant of {name}.\n",
        name = if business.display_name.is_empty() {
            &tenant.name
        } else {
            &business.display_name
        }
    ));
    if !business.description.is_empty() {
        static_tier.push_str(&format!("{}\n", business.description));
    }
    if !business.industry.is_empty() {
        static_tier.push_str(&format!("Industry: {}\n", business.industry));
    }
    if !business.tone.is_empty() {
        static_tier.push_str(&format!("Tone: {}\n", business.tone));
    }
    if !business.language.is_empty() {
        static_tier.push_str(&format!(
            "Always answer in the customer's language; default to {}.\n",
            business.language
        ));
    }
    static_tier.push('\n');
    static_tier.push_str(RESPONSE_CONTRACT);

    let mut context_tier = String::from(state_block);
    let knowledge = rag.knowledge_block();
    if !knowledge.is_empty() {
        context_tier.push('\n');
        context_tier.push_str(&knowledge);
    }
    let examples = rag.examples_block();
    if !examples.is_empty() {
        context_tier.push('\n');
        context_tier.push_str(&examples);
    }

    let volatile_tier = format!("Current time: {} UTC", now.format("%Y-%m-%d %H:%M"));

    SystemPrompt {
        static_tier,
        context_tier,
        volatile_tier,
    }
}

/// Convert stored history into chat messages, oldest first.
///
/// User turns carry a channel+timestamp envelope so the LLM can reason about
/// gaps; assistant turns are passed through untouched. Audio turns surface
/// their transcription instead of the placeholder content.
pub fn history_messages(history: &[StoredMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| {
            let text = m
                .transcription
                .clone()
                .or_else(|| m.image_analysis.as_ref().map(|a| format!("[image: {a}]")))
                .unwrap_or_else(|| m.content.clone());
            match m.direction {
                Direction::Outbound => ChatMessage {
                    role: Role::Assistant,
                    content: text,
                },
                Direction::Inbound => ChatMessage {
                    role: Role::User,
                    content: envelope(m.kind.as_str(), m.created_at, &text),
                },
            }
        })
        .collect()
}

/// Wrap a user message with its kind and timestamp:
/// `[text 2026-08-01 17:02 UTC] hola`.
pub fn envelope(kind: &str, at: DateTime<Utc>, content: &str) -> String {
    format!("[{} {}] {}", kind, at.format("%Y-%m-%d %H:%M UTC"), content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::ids::{MessageId, SessionId, TenantId};
    use charla_core::message::MessageKind;
    use charla_store::types::DeliveryStatus;

    fn tenant() -> TenantConfig {
        serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "Acme",
            "namespace": "acme",
            "storage_bucket": "acme-media",
            "state_machine": "sales_v2",
            "business": {
                "display_name": "Acme Seguros",
                "description": "Venta de seguros de auto.",
                "tone": "cercano, tutea al cliente",
                "language": "es-MX"
            }
        }))
        .unwrap()
    }

    fn msg(direction: Direction, content: &str) -> StoredMessage {
        StoredMessage {
            id: MessageId::new(),
            tenant_id: TenantId::from("t1"),
            session_id: SessionId::from("s1"),
            direction,
            kind: MessageKind::Text,
            content: content.to_string(),
            media_url: None,
            transcription: None,
            image_analysis: None,
            template_name: None,
            platform_message_id: None,
            delivery_status: DeliveryStatus::Sent,
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn system_prompt_carries_business_and_contract() {
        let prompt = build_system_prompt(&tenant(), "## Current state: greeting\n", &RagContext::default(), Utc::now());
        let text = prompt.to_plain_text();
        assert!(text.contains("Acme Seguros"));
        assert!(text.contains("Current state: greeting"));
        assert!(text.contains("\"shouldEscalate\""));
        assert!(text.contains("Current time:"));
    }

    #[test]
    fn history_wraps_user_turns_only() {
        let history = vec![msg(Direction::Inbound, "hola"), msg(Direction::Outbound, "¡Hola!")];
        let messages = history_messages(&history);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].role, Role::User));
        assert!(messages[0].content.starts_with("[text "));
        assert!(messages[0].content.ends_with("] hola"));
        assert!(matches!(messages[1].role, Role::Assistant));
        assert_eq!(messages[1].content, "¡Hola!");
    }

    #[test]
    fn history_prefers_transcription() {
        let mut audio = msg(Direction::Inbound, "[voice note]");
        audio.kind = MessageKind::Audio;
        audio.transcription = Some("quiero el plan".into());
        let messages = history_messages(&[audio]);
        assert!(messages[0].content.ends_with("] quiero el plan"));
    }
}
