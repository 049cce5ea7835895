//! Cloud API send client. Template sends fall back to plain text when the
//! platform rejects the template, so a misconfigured template name degrades
//! to a readable message instead of silence.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use charla_core::message::{PlannedKind, PlannedMessage};
use charla_core::provider::{DeliveryReceipt, OutboundChannel, ProviderError};
use charla_core::tenant::ChannelCredentials;

use crate::error::{Result, WhatsAppError};

/// Template language sent when the tenant config does not override it.
const DEFAULT_TEMPLATE_LANG: &str = "es_MX";

pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base: String,
    phone_number_id: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(credentials: &ChannelCredentials, default_api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: credentials
                .api_base
                .clone()
                .unwrap_or_else(|| default_api_base.to_string()),
            phone_number_id: credentials.channel_id.clone(),
            access_token: credentials.access_token.clone(),
        }
    }

    /// Send a plain text message. Returns the platform message id.
    pub async fn send_text(&self, to: &str, body: &str, reply_to: Option<&str>) -> Result<String> {
        let mut payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": {"body": body},
        });
        if let Some(id) = reply_to {
            payload["context"] = json!({"message_id": id});
        }
        self.post_message(payload).await
    }

    /// Send an approved template with optional header image, body params, and
    /// button params.
    pub async fn send_template(
        &self,
        to: &str,
        name: &str,
        header_image: Option<&str>,
        body_params: &[String],
        button_params: &[String],
    ) -> Result<String> {
        let mut components = Vec::new();
        if let Some(url) = header_image {
            components.push(json!({
                "type": "header",
                "parameters": [{"type": "image", "image": {"link": url}}],
            }));
        }
        if !body_params.is_empty() {
            let params: Vec<_> = body_params
                .iter()
                .map(|p| json!({"type": "text", "text": p}))
                .collect();
            components.push(json!({"type": "body", "parameters": params}));
        }
        for (index, param) in button_params.iter().enumerate() {
            components.push(json!({
                "type": "button",
                "sub_type": "url",
                "index": index.to_string(),
                "parameters": [{"type": "text", "text": param}],
            }));
        }

        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": {
                "name": name,
                "language": {"code": DEFAULT_TEMPLATE_LANG},
                "components": components,
            },
        });
        self.post_message(payload).await
    }

    /// Send an image or video by URL with an optional caption.
    pub async fn send_media(
        &self,
        to: &str,
        kind: PlannedKind,
        url: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        let media_kind = match kind {
            PlannedKind::Image => "image",
            PlannedKind::Video => "video",
            _ => "image",
        };
        let mut media = json!({"link": url});
        if let Some(caption) = caption {
            media["caption"] = json!(caption);
        }
        let mut payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": media_kind,
        });
        payload[media_kind] = media;
        self.post_message(payload).await
    }

    /// Resolve a webhook media id to a short-lived download URL.
    pub async fn media_url(&self, media_id: &str) -> Result<String> {
        let url = format!("{}/{}", self.api_base, media_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| WhatsAppError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api { status, message });
        }
        let body: MediaUrlResponse = resp
            .json()
            .await
            .map_err(|e| WhatsAppError::Http(e.to_string()))?;
        Ok(body.url)
    }

    async fn post_message(&self, payload: serde_json::Value) -> Result<String> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        debug!(endpoint = %self.phone_number_id, "sending WhatsApp message");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WhatsAppError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, body = %message, "WhatsApp API error");
            return Err(WhatsAppError::Api { status, message });
        }

        let body: SendResponse = resp
            .json()
            .await
            .map_err(|e| WhatsAppError::Http(e.to_string()))?;
        body.messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| WhatsAppError::Api {
                status,
                message: "send response carried no message id".into(),
            })
    }
}

#[async_trait]
impl OutboundChannel for WhatsAppClient {
    async fn deliver(
        &self,
        recipient: &str,
        message: &PlannedMessage,
        reply_to: Option<&str>,
    ) -> std::result::Result<DeliveryReceipt, ProviderError> {
        match message.kind {
            PlannedKind::Text => {
                let id = self
                    .send_text(recipient, &message.content, reply_to)
                    .await
                    .map_err(provider_err)?;
                Ok(DeliveryReceipt {
                    platform_message_id: id,
                    used_fallback: false,
                })
            }
            PlannedKind::Template => {
                let name = message.template_name.as_deref().unwrap_or_default();
                match self
                    .send_template(recipient, name, None, &message.template_params, &[])
                    .await
                {
                    Ok(id) => Ok(DeliveryReceipt {
                        platform_message_id: id,
                        used_fallback: false,
                    }),
                    Err(e) => {
                        warn!(template = %name, error = %e, "template send failed; falling back to text");
                        let id = self
                            .send_text(recipient, &message.content, reply_to)
                            .await
                            .map_err(provider_err)?;
                        Ok(DeliveryReceipt {
                            platform_message_id: id,
                            used_fallback: true,
                        })
                    }
                }
            }
            PlannedKind::Image | PlannedKind::Video => {
                let id = self
                    .send_media(recipient, message.kind, &message.content, None)
                    .await
                    .map_err(provider_err)?;
                Ok(DeliveryReceipt {
                    platform_message_id: id,
                    used_fallback: false,
                })
            }
        }
    }
}

fn provider_err(e: WhatsAppError) -> ProviderError {
    match e {
        WhatsAppError::Api { status, message } => ProviderError::Api { status, message },
        other => ProviderError::Http(other.to_string()),
    }
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Deserialize)]
struct MediaUrlResponse {
    url: String,
}
