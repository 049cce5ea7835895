//! Per-tenant configuration — loaded from the store at runtime, cached by the
//! gateway's tenant registry. Channel credentials live here, never in the
//! environment.

use serde::{Deserialize, Serialize};

use crate::ids::TenantId;
use crate::message::ChannelKind;

/// Everything the runtime needs to know about one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: TenantId,
    pub name: String,
    /// Isolated data namespace label; threaded into blob paths and logs.
    pub namespace: String,
    /// Blob storage bucket/prefix for inbound media.
    pub storage_bucket: String,
    /// Name of the active state machine for this tenant.
    pub state_machine: String,
    /// LLM provider selection (resolved by the host wiring).
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default)]
    pub channels: Vec<ChannelCredentials>,
    #[serde(default)]
    pub debounce: DebounceSettings,
    #[serde(default)]
    pub escalation: EscalationSettings,
    /// Approved template sent instead of plain text when the 24-hour
    /// customer-service window has closed.
    #[serde(default)]
    pub followup_fallback_template: Option<String>,
    #[serde(default)]
    pub business: BusinessProfile,
}

impl TenantConfig {
    /// Credentials for a channel kind, if the tenant has that channel wired.
    pub fn channel(&self, kind: ChannelKind) -> Option<&ChannelCredentials> {
        self.channels.iter().find(|c| c.kind == kind)
    }
}

/// Credentials and endpoint identity for one channel of one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCredentials {
    pub kind: ChannelKind,
    /// Provider-side endpoint id (WhatsApp: `phone_number_id`).
    pub channel_id: String,
    /// Bearer token for the provider API.
    pub access_token: String,
    /// App secret used to verify webhook signatures (HMAC-SHA256).
    pub app_secret: String,
    /// Override for the provider API base URL.
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceSettings {
    pub enabled: bool,
    /// How long to wait for the burst to settle before processing.
    pub delay_ms: u64,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EscalationSettings {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Where to POST escalation notifications (ops webhook, Slack bridge, …).
    #[serde(default)]
    pub notify_url: Option<String>,
}

/// Business metadata folded into every system prompt.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BusinessProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub industry: String,
    /// Tone-of-voice guidance, e.g. "cercano, profesional, tutea al cliente".
    #[serde(default)]
    pub tone: String,
    /// Primary conversation language (BCP-47-ish, e.g. "es-MX").
    #[serde(default)]
    pub language: String,
}

fn bool_true() -> bool {
    true
}

fn default_llm_provider() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_tenant_json_fills_defaults() {
        let cfg: TenantConfig = serde_json::from_str(
            r#"{
                "id": "t1",
                "name": "Acme",
                "namespace": "acme",
                "storage_bucket": "acme-media",
                "state_machine": "sales_v2"
            }"#,
        )
        .unwrap();
        assert!(cfg.debounce.enabled);
        assert_eq!(cfg.debounce.delay_ms, 3000);
        assert!(cfg.escalation.enabled);
        assert!(cfg.channel(ChannelKind::Whatsapp).is_none());
    }
}
