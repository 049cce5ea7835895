//! Webhook payload types (the subset the platform actually sends for
//! messages) and normalization into the channel-neutral contract.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use charla_core::message::{
    InteractiveKind, InteractivePayload, MessageKind, NormalizedMessage,
};

use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    pub metadata: Metadata,
    #[serde(default)]
    pub messages: Vec<WaMessage>,
    #[serde(default)]
    pub contacts: Vec<WaContact>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WaContact {
    #[serde(default)]
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<WaProfile>,
}

#[derive(Debug, Deserialize)]
pub struct WaProfile {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WaMessage {
    pub id: String,
    pub from: String,
    /// Unix seconds, as a string.
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WaText>,
    #[serde(default)]
    pub image: Option<WaMedia>,
    #[serde(default)]
    pub audio: Option<WaMedia>,
    #[serde(default)]
    pub video: Option<WaMedia>,
    #[serde(default)]
    pub sticker: Option<WaMedia>,
    #[serde(default)]
    pub interactive: Option<WaInteractive>,
    #[serde(default)]
    pub context: Option<WaContext>,
}

#[derive(Debug, Deserialize)]
pub struct WaText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct WaMedia {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaInteractive {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub button_reply: Option<WaReply>,
    #[serde(default)]
    pub list_reply: Option<WaReply>,
}

#[derive(Debug, Deserialize)]
pub struct WaReply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct WaContext {
    pub id: String,
}

/// One normalized inbound message plus its routing metadata.
#[derive(Debug)]
pub struct InboundEvent {
    /// `metadata.phone_number_id` — routes to the tenant.
    pub endpoint_id: String,
    /// The sender's wa_id (phone number) — the session's channel user id.
    pub sender_id: String,
    pub message: NormalizedMessage,
    /// Platform media id; must be resolved to a download URL via the API.
    pub media_id: Option<String>,
    /// Display name from the contacts block, when present.
    pub sender_name: Option<String>,
}

/// Parse and normalize a webhook body into inbound events.
///
/// Unsupported message kinds (reactions, system notices, delivery statuses)
/// are skipped; a webhook carrying only those yields an empty vec.
pub fn normalize_payload(body: &[u8]) -> Result<Vec<InboundEvent>> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    let mut events = Vec::new();

    for entry in payload.entry {
        for change in entry.changes {
            let value = change.value;
            let endpoint_id = value.metadata.phone_number_id.clone();
            for msg in value.messages {
                let sender_name = value
                    .contacts
                    .iter()
                    .find(|c| c.wa_id == msg.from)
                    .and_then(|c| c.profile.as_ref())
                    .map(|p| p.name.clone());
                if let Some((normalized, media_id)) = normalize_message(&msg) {
                    events.push(InboundEvent {
                        endpoint_id: endpoint_id.clone(),
                        sender_id: msg.from.clone(),
                        message: normalized,
                        media_id,
                        sender_name,
                    });
                } else {
                    debug!(kind = %msg.kind, id = %msg.id, "skipping unsupported webhook message kind");
                }
            }
        }
    }
    Ok(events)
}

fn normalize_message(msg: &WaMessage) -> Option<(NormalizedMessage, Option<String>)> {
    let timestamp = parse_timestamp(&msg.timestamp);
    let reply_to = msg.context.as_ref().map(|c| c.id.clone());

    let (kind, content, media_id, interactive) = match msg.kind.as_str() {
        "text" => (
            MessageKind::Text,
            msg.text.as_ref().map(|t| t.body.clone()),
            None,
            None,
        ),
        "image" => media_parts(MessageKind::Image, msg.image.as_ref()?),
        "audio" => media_parts(MessageKind::Audio, msg.audio.as_ref()?),
        "video" => media_parts(MessageKind::Video, msg.video.as_ref()?),
        "sticker" => media_parts(MessageKind::Sticker, msg.sticker.as_ref()?),
        "interactive" => {
            let interactive = msg.interactive.as_ref()?;
            let payload = match interactive.kind.as_str() {
                "button_reply" => {
                    let reply = interactive.button_reply.as_ref()?;
                    InteractivePayload {
                        kind: InteractiveKind::ButtonReply,
                        button_id: Some(reply.id.clone()),
                        list_id: None,
                        title: reply.title.clone(),
                    }
                }
                "list_reply" => {
                    let reply = interactive.list_reply.as_ref()?;
                    InteractivePayload {
                        kind: InteractiveKind::ListReply,
                        button_id: None,
                        list_id: Some(reply.id.clone()),
                        title: reply.title.clone(),
                    }
                }
                _ => return None,
            };
            (MessageKind::Interactive, None, None, Some(payload))
        }
        _ => return None,
    };

    let normalized = NormalizedMessage {
        id: msg.id.clone(),
        timestamp,
        kind,
        content,
        media_url: None,
        transcription: None,
        image_analysis: None,
        interactive_payload: interactive,
        reply_to_message_id: reply_to,
    };
    Some((normalized, media_id))
}

fn media_parts(
    kind: MessageKind,
    media: &WaMedia,
) -> (MessageKind, Option<String>, Option<String>, Option<InteractivePayload>) {
    (kind, media.caption.clone(), Some(media.id.clone()), None)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}
