//! Follow-up config rendering: resolve variables, substitute `{{key}}` slots
//! in text bodies, fill positional params for templates.

use std::collections::BTreeMap;

use charla_core::message::PlannedMessage;
use charla_core::tenant::TenantConfig;
use charla_engine::{generate_followup_variable, EngineContext};
use charla_store::types::{FollowupConfig, FollowupConfigKind, Session, VariableConfig, VariableKind};

use crate::error::Result;

/// Resolve every variable of a config to a concrete string, in declared order.
pub async fn resolve_variables<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session: &Session,
    vars: &[VariableConfig],
) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    for var in vars {
        let value = match var.kind {
            VariableKind::Literal => var.value.clone().unwrap_or_default(),
            VariableKind::Context => var
                .field
                .as_deref()
                .and_then(|field| session.context.get(field))
                .map(context_value_to_string)
                .unwrap_or_default(),
            VariableKind::Llm => {
                let prompt = var.prompt.as_deref().unwrap_or_default();
                generate_followup_variable(ctx, tenant, &session.id, prompt).await?
            }
        };
        values.insert(var.key.clone(), value);
    }
    Ok(values)
}

/// Substitute `{{key}}` slots in a text body. Unknown slots stay verbatim so
/// a typo is visible instead of silently vanishing.
pub fn render_text(body: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = body.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Render a registered config into one deliverable message.
pub async fn render_config<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session: &Session,
    config: &FollowupConfig,
) -> Result<PlannedMessage> {
    let values = resolve_variables(ctx, tenant, session, &config.variables).await?;
    Ok(match config.kind {
        FollowupConfigKind::Text => {
            let body = config.body.as_deref().unwrap_or_default();
            PlannedMessage::text(render_text(body, &values))
        }
        FollowupConfigKind::Template => {
            // Variables fill positional params in declared order; the body
            // (when present) doubles as the plain-text fallback content.
            let params: Vec<String> = config
                .variables
                .iter()
                .filter_map(|v| values.get(&v.key).cloned())
                .collect();
            let name = config.template_name.clone().unwrap_or_else(|| config.name.clone());
            let body = config
                .body
                .as_deref()
                .map(|b| render_text(b, &values))
                .unwrap_or_else(|| name.clone());
            PlannedMessage::template(name, params, body)
        }
    })
}

fn context_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
