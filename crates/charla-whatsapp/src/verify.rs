//! Webhook authentication: the GET subscription handshake and the
//! HMAC-SHA256 body signature on every POST.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// GET handshake: return the challenge iff the mode and token match.
pub fn verify_subscribe<'a>(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
    expected_token: &str,
) -> Option<&'a str> {
    if expected_token.is_empty() {
        return None;
    }
    match (mode, token, challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected_token => {
            Some(challenge)
        }
        _ => None,
    }
}

/// Verify `x-hub-signature-256: sha256=<hex>` over the raw body.
pub fn verify_signature(
    signature_header: Option<&str>,
    body: &[u8],
    app_secret: &str,
) -> Result<(), String> {
    let header = signature_header.ok_or_else(|| "missing X-Hub-Signature-256 header".to_string())?;
    let sig_hex = header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;
    let expected =
        hex::decode(sig_hex).map_err(|_| "X-Hub-Signature-256 is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}
