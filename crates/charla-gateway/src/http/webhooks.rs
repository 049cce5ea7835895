//! WhatsApp webhook ingress — GET /webhooks/whatsapp (subscription
//! handshake) and POST /webhooks/whatsapp (inbound messages).
//!
//! The POST path parses the (still-untrusted) body first to discover which
//! tenant's channel it addresses, verifies the HMAC signature with that
//! tenant's app secret, and only then hands the events to the pipeline.
//! Processing runs in a spawned task so the platform gets its 200 fast.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use charla_core::message::{ChannelKey, ChannelKind};
use charla_core::tenant::TenantConfig;
use charla_debounce::{ingest, IngestOutcome};
use charla_engine::process_message;
use charla_whatsapp::webhook::InboundEvent;
use charla_whatsapp::{normalize_payload, verify_signature, verify_subscribe};

use crate::app::AppState;
use crate::deliver::deliver_responses;

/// GET /webhooks/whatsapp — echo the challenge iff the verify token matches.
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = verify_subscribe(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        &state.config.whatsapp.verify_token,
    );
    match challenge {
        Some(challenge) => (StatusCode::OK, challenge.to_string()).into_response(),
        None => {
            warn!("webhook subscription verification failed");
            (StatusCode::FORBIDDEN, "verification failed").into_response()
        }
    }
}

/// POST /webhooks/whatsapp — always 200 once the signature checks out;
/// processing failures are retried out-of-band via the debounce buffer.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let events = match normalize_payload(&body) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "unparseable webhook body");
            return ack();
        }
    };
    if events.is_empty() {
        return ack();
    }

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Group by endpoint: one tenant resolution + signature check per channel.
    let mut verified: HashMap<String, TenantConfig> = HashMap::new();
    for event in &events {
        if verified.contains_key(&event.endpoint_id) {
            continue;
        }
        let tenant = match state
            .registry
            .resolve(&state.stores, ChannelKind::Whatsapp, &event.endpoint_id)
        {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                dispatch_unknown(&state, &event.endpoint_id, &body);
                continue;
            }
            Err(e) => {
                warn!(endpoint = %event.endpoint_id, error = %e, "tenant lookup failed");
                continue;
            }
        };
        let Some(credentials) = tenant.channel(ChannelKind::Whatsapp) else {
            continue;
        };
        if let Err(reason) = verify_signature(signature.as_deref(), &body, &credentials.app_secret)
        {
            warn!(endpoint = %event.endpoint_id, reason = %reason, "webhook signature rejected");
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid signature"})))
                .into_response();
        }
        verified.insert(event.endpoint_id.clone(), tenant);
    }

    for event in events {
        let Some(tenant) = verified.get(&event.endpoint_id).cloned() else {
            continue;
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_inbound(state, tenant, event).await;
        });
    }

    ack()
}

fn ack() -> Response {
    Json(json!({"received": true})).into_response()
}

/// Optionally forward payloads for unrecognized channel ids to the
/// configured dispatch URL (fire-and-forget).
fn dispatch_unknown(state: &Arc<AppState>, endpoint_id: &str, body: &Bytes) {
    let Some(url) = state.config.whatsapp.dispatch_url.clone() else {
        warn!(endpoint = %endpoint_id, "webhook for unknown channel id dropped");
        return;
    };
    info!(endpoint = %endpoint_id, "forwarding unknown channel payload to dispatch URL");
    let body = body.clone();
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        if let Err(e) = client
            .post(&url)
            .header("content-type", "application/json")
            .body(body.to_vec())
            .send()
            .await
        {
            warn!(error = %e, "dispatch forward failed");
        }
    });
}

/// Run one inbound event through media resolution, the debounce buffer (or
/// the engine directly), and outbound delivery.
async fn handle_inbound(state: Arc<AppState>, tenant: TenantConfig, mut event: InboundEvent) {
    // Provider-hosted media: resolve the media id to a download URL so the
    // pipeline can fetch it.
    if let Some(media_id) = &event.media_id {
        if let Some(client) = state.whatsapp_client(&tenant) {
            match client.media_url(media_id).await {
                Ok(url) => event.message.media_url = Some(url),
                Err(e) => warn!(media = %media_id, error = %e, "media URL resolution failed"),
            }
        }
    }

    let key = ChannelKey::new(ChannelKind::Whatsapp, &event.endpoint_id, &event.sender_id);

    // Commands bypass the debounce buffer.
    let is_command = event
        .message
        .content
        .as_deref()
        .map(|c| c.starts_with('/'))
        .unwrap_or(false);

    if !is_command {
        if let IngestOutcome::Buffered { scheduled_process_at } =
            ingest(&state.stores, &tenant, &key, &event.message)
        {
            info!(
                tenant = %tenant.id,
                key = %key,
                at = %scheduled_process_at.to_rfc3339(),
                "inbound buffered for debounce"
            );
            return;
        }
    }

    // Immediate path: debounce disabled, degraded, or a command.
    match process_message(
        state.as_ref(),
        &tenant,
        &key,
        &event.message,
        event.sender_name.as_deref(),
    )
    .await
    {
        Ok(outcome) if !outcome.responses.is_empty() => {
            let reply_to = event
                .message
                .reply_to_message_id
                .is_some()
                .then_some(event.message.id.as_str());
            deliver_responses(&state, &tenant, &event.sender_id, reply_to, &outcome.responses).await;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(tenant = %tenant.id, key = %key, error = %e, "immediate processing failed");
        }
    }
}
