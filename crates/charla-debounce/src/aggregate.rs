//! Burst aggregation: fold a drained buffer into one synthetic message.
//!
//! Textual parts (content, transcription, interactive titles) are joined
//! newline-separated in received order; the latest non-text attachment wins
//! and lends the synthetic message its kind and media URL.

use charla_core::message::{MessageKind, NormalizedMessage};
use charla_store::types::BufferedMessage;

/// Collapse drained rows into one logical turn. `None` when `rows` is empty.
pub fn aggregate(rows: &[BufferedMessage]) -> Option<NormalizedMessage> {
    let last = rows.last()?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut latest_media: Option<&NormalizedMessage> = None;

    for row in rows {
        let payload = &row.payload;
        if let Some(t) = &payload.transcription {
            text_parts.push(t.clone());
        } else if let Some(c) = payload.content.as_deref().filter(|c| !c.is_empty()) {
            text_parts.push(c.to_string());
        } else if let Some(ip) = &payload.interactive_payload {
            text_parts.push(ip.title.clone());
        }
        if payload.kind != MessageKind::Text && payload.media_url.is_some() {
            latest_media = Some(payload);
        }
    }

    let content = text_parts.join("\n");
    let mut synthetic = NormalizedMessage {
        id: last.payload.id.clone(),
        timestamp: last.payload.timestamp,
        kind: MessageKind::Text,
        content: (!content.is_empty()).then_some(content),
        media_url: None,
        transcription: None,
        image_analysis: None,
        interactive_payload: None,
        reply_to_message_id: last.payload.reply_to_message_id.clone(),
    };

    if let Some(media) = latest_media {
        synthetic.kind = media.kind;
        synthetic.media_url = media.media_url.clone();
        synthetic.image_analysis = media.image_analysis.clone();
    }

    Some(synthetic)
}
