//! Deterministic session-key hashing for the buffer's grouping key.

use sha2::{Digest, Sha256};

use charla_core::message::ChannelKey;

/// Short hex digest of the channel triple. 16 hex chars (64 bits) keeps the
/// key compact while collisions stay out of practical reach for per-tenant
/// session counts.
pub fn session_key_hash(key: &ChannelKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(key.endpoint_id.as_bytes());
    hasher.update(b":");
    hasher.update(key.user_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
