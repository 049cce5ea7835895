//! WhatsApp Cloud API channel adapter: webhook payload parsing and
//! normalization on the way in, message/template sends on the way out.

pub mod client;
pub mod error;
pub mod verify;
pub mod webhook;

pub use client::WhatsAppClient;
pub use error::WhatsAppError;
pub use verify::{verify_signature, verify_subscribe};
pub use webhook::{normalize_payload, InboundEvent, WebhookPayload};
