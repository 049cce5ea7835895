//! Channel-neutral message contracts — shared between ingress, the engine,
//! the debounce buffer, and outbound delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which messaging platform a session lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Whatsapp,
}

impl ChannelKind {
    /// Whether the platform enforces a 24-hour customer-service window:
    /// business-initiated text outside the window must use an approved template.
    pub fn enforces_session_window(&self) -> bool {
        matches!(self, ChannelKind::Whatsapp)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(ChannelKind::Whatsapp),
            other => Err(format!("unknown channel kind: {}", other)),
        }
    }
}

/// The triple that uniquely identifies one conversation: platform, the
/// business endpoint on that platform (e.g. a WhatsApp phone-number id),
/// and the end user's id on that platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub kind: ChannelKind,
    /// Business-side endpoint id (WhatsApp: `phone_number_id`).
    pub endpoint_id: String,
    /// End-user id on the platform (WhatsApp: the wa_id / phone number).
    pub user_id: String,
}

impl ChannelKey {
    pub fn new(kind: ChannelKind, endpoint_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint_id: endpoint_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.endpoint_id, self.user_id)
    }
}

/// Message payload kinds, shared by inbound and outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Template,
    Interactive,
    Sticker,
}

impl MessageKind {
    pub fn is_media(&self) -> bool {
        matches!(self, MessageKind::Image | MessageKind::Audio | MessageKind::Video)
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
            MessageKind::Template => "template",
            MessageKind::Interactive => "interactive",
            MessageKind::Sticker => "sticker",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "audio" => Ok(MessageKind::Audio),
            "video" => Ok(MessageKind::Video),
            "template" => Ok(MessageKind::Template),
            "interactive" => Ok(MessageKind::Interactive),
            "sticker" => Ok(MessageKind::Sticker),
            other => Err(format!("unknown message kind: {}", other)),
        }
    }
}

/// Structured payload of a button or list reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractivePayload {
    #[serde(rename = "type")]
    pub kind: InteractiveKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveKind {
    ButtonReply,
    ListReply,
}

/// The channel-neutral inbound message every adapter produces.
///
/// `content` is whatever text the platform delivered (body or caption);
/// `transcription` / `image_analysis` are filled by the media pipeline and
/// are only ever shown to the LLM, never back to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    /// Platform message id.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_payload: Option<InteractivePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

impl NormalizedMessage {
    /// The text the LLM should see for this message: transcription for audio,
    /// image analysis for images, interactive title for button taps, and the
    /// plain content otherwise.
    pub fn llm_visible_text(&self) -> String {
        if let Some(t) = &self.transcription {
            return t.clone();
        }
        if let Some(a) = &self.image_analysis {
            match &self.content {
                Some(c) if !c.is_empty() => return format!("{}\n[image: {}]", c, a),
                _ => return format!("[image: {}]", a),
            }
        }
        if let Some(ip) = &self.interactive_payload {
            return ip.title.clone();
        }
        self.content.clone().unwrap_or_default()
    }
}

/// Kind of an outbound message planned by the engine or a follow-up config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannedKind {
    Text,
    Template,
    Image,
    Video,
}

impl PlannedKind {
    pub fn message_kind(&self) -> MessageKind {
        match self {
            PlannedKind::Text => MessageKind::Text,
            PlannedKind::Template => MessageKind::Template,
            PlannedKind::Image => MessageKind::Image,
            PlannedKind::Video => MessageKind::Video,
        }
    }
}

/// One outbound message the caller must deliver. Produced by the LLM reply
/// parser and by the follow-up renderer; consumed by channel egress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedMessage {
    #[serde(rename = "type")]
    pub kind: PlannedKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl PlannedMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: PlannedKind::Text,
            content: content.into(),
            template_name: None,
            template_params: Vec::new(),
            delay_ms: None,
        }
    }

    pub fn template(name: impl Into<String>, params: Vec<String>, body: impl Into<String>) -> Self {
        Self {
            kind: PlannedKind::Template,
            content: body.into(),
            template_name: Some(name.into()),
            template_params: params,
            delay_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(kind: MessageKind) -> NormalizedMessage {
        NormalizedMessage {
            id: "wamid.1".into(),
            timestamp: Utc::now(),
            kind,
            content: None,
            media_url: None,
            transcription: None,
            image_analysis: None,
            interactive_payload: None,
            reply_to_message_id: None,
        }
    }

    #[test]
    fn llm_text_prefers_transcription() {
        let mut m = inbound(MessageKind::Audio);
        m.content = Some("[voice note]".into());
        m.transcription = Some("quiero pagar en doce meses".into());
        assert_eq!(m.llm_visible_text(), "quiero pagar en doce meses");
    }

    #[test]
    fn llm_text_combines_caption_and_analysis() {
        let mut m = inbound(MessageKind::Image);
        m.content = Some("mira esto".into());
        m.image_analysis = Some("a payment receipt for $500".into());
        assert_eq!(m.llm_visible_text(), "mira esto\n[image: a payment receipt for $500]");
    }

    #[test]
    fn llm_text_uses_interactive_title() {
        let mut m = inbound(MessageKind::Interactive);
        m.interactive_payload = Some(InteractivePayload {
            kind: InteractiveKind::ButtonReply,
            button_id: Some("btn_yes".into()),
            list_id: None,
            title: "Sí, me interesa".into(),
        });
        assert_eq!(m.llm_visible_text(), "Sí, me interesa");
    }

    #[test]
    fn channel_key_display_is_colon_joined() {
        let key = ChannelKey::new(ChannelKind::Whatsapp, "123", "5215550001");
        assert_eq!(key.to_string(), "whatsapp:123:5215550001");
    }

    #[test]
    fn planned_message_serde_uses_camel_case() {
        let m = PlannedMessage::template("payment_reminder", vec!["Juan".into()], "Hola Juan");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["type"], "template");
        assert_eq!(v["templateName"], "payment_reminder");
        assert_eq!(v["templateParams"][0], "Juan");
    }
}
