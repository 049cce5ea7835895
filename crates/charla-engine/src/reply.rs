//! Parsing of the LLM's structured reply.
//!
//! The contract asks for a single JSON object; models still wrap it in fenced
//! code blocks or stray prose often enough that the parser strips fences and,
//! failing that, extracts the outermost `{ … }` span. Unknown fields are
//! ignored; unknown escalation reasons degrade to `ai_uncertainty`.

use serde::Deserialize;

use charla_core::message::PlannedMessage;
use charla_store::types::{EscalationPriority, EscalationReason};

/// A state transition proposed by the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionPlan {
    pub to: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: f64,
}

/// An escalation proposed by the LLM.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationPlan {
    #[serde(default)]
    pub should_escalate: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    priority: Option<String>,
}

impl EscalationPlan {
    /// Closed-set reason; anything unrecognized degrades to `ai_uncertainty`.
    pub fn reason(&self) -> EscalationReason {
        self.reason
            .as_deref()
            .and_then(|r| r.parse().ok())
            .unwrap_or(EscalationReason::AiUncertainty)
    }

    pub fn priority(&self) -> EscalationPriority {
        self.priority
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(EscalationPriority::Medium)
    }
}

/// A deposit confirmation detected by the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct DepositPlan {
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub reasoning: String,
}

fn default_currency() -> String {
    "MXN".to_string()
}

/// The full structured reply.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LlmReply {
    #[serde(default)]
    pub responses: Vec<PlannedMessage>,
    #[serde(default)]
    pub transition: Option<TransitionPlan>,
    #[serde(default)]
    pub escalation: Option<EscalationPlan>,
    #[serde(default)]
    pub is_uncertain: Option<bool>,
    #[serde(default)]
    pub context_updates: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub deposit_confirmed: Option<DepositPlan>,
}

#[derive(Debug, thiserror::Error)]
#[error("unparseable LLM reply: {0}")]
pub struct ReplyParseError(String);

/// Parse the raw LLM output into an [`LlmReply`].
pub fn parse_reply(raw: &str) -> Result<LlmReply, ReplyParseError> {
    let stripped = strip_code_fences(raw);
    if let Ok(reply) = serde_json::from_str::<LlmReply>(stripped) {
        return Ok(reply);
    }
    // Last resort: the outermost brace span, for replies with stray prose.
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(reply) = serde_json::from_str::<LlmReply>(&stripped[start..=end]) {
                return Ok(reply);
            }
        }
    }
    Err(ReplyParseError(truncate(raw, 200)))
}

/// Remove a surrounding ``` fence (with optional language tag) if present.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag line ("json", "JSON", or empty).
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::message::PlannedKind;

    #[test]
    fn parses_plain_json() {
        let reply = parse_reply(
            r#"{
                "responses": [{"type": "text", "content": "¡Hola!"}],
                "transition": {"to": "pitching_12x", "reason": "interest", "confidence": 0.9}
            }"#,
        )
        .unwrap();
        assert_eq!(reply.responses.len(), 1);
        assert_eq!(reply.responses[0].kind, PlannedKind::Text);
        assert_eq!(reply.transition.as_ref().unwrap().to, "pitching_12x");
    }

    #[test]
    fn strips_fenced_blocks() {
        let raw = "```json\n{\"responses\": [{\"type\": \"text\", \"content\": \"ok\"}]}\n```";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.responses[0].content, "ok");
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let raw = "Sure! Here is the JSON:\n{\"responses\": []}\nLet me know if you need more.";
        assert!(parse_reply(raw).is_ok());
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_reply("I cannot answer that.").is_err());
        assert!(parse_reply("").is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let reply = parse_reply(r#"{"responses": [], "futureField": {"x": 1}}"#).unwrap();
        assert!(reply.responses.is_empty());
    }

    #[test]
    fn unknown_escalation_reason_degrades_to_uncertainty() {
        let reply = parse_reply(
            r#"{"escalation": {"shouldEscalate": true, "reason": "cosmic_rays", "summary": "?", "priority": "galactic"}}"#,
        )
        .unwrap();
        let esc = reply.escalation.unwrap();
        assert_eq!(esc.reason(), EscalationReason::AiUncertainty);
        assert_eq!(esc.priority(), EscalationPriority::Medium);
    }

    #[test]
    fn known_escalation_fields_parse() {
        let reply = parse_reply(
            r#"{"escalation": {"shouldEscalate": true, "reason": "explicit_request", "confidence": 0.95, "summary": "User wants human", "priority": "high"}}"#,
        )
        .unwrap();
        let esc = reply.escalation.unwrap();
        assert!(esc.should_escalate);
        assert_eq!(esc.reason(), EscalationReason::ExplicitRequest);
        assert_eq!(esc.priority(), EscalationPriority::High);
    }

    #[test]
    fn deposit_defaults_currency() {
        let reply = parse_reply(r#"{"depositConfirmed": {"amount": 500, "reasoning": "receipt"}}"#).unwrap();
        let dep = reply.deposit_confirmed.unwrap();
        assert_eq!(dep.amount, 500.0);
        assert_eq!(dep.currency, "MXN");
    }
}
