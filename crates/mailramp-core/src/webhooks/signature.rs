//! HMAC-SHA256 signature checks for inbound webhooks

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_over(secret: &str, parts: &[&[u8]]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

/// Compute the `sha256=<hex>` header value for a body
pub fn sign_hex(secret: &str, body: &[u8]) -> String {
    match mac_over(secret, &[body]) {
        Some(mac) => format!("sha256={}", hex::encode(mac.finalize().into_bytes())),
        None => String::new(),
    }
}

/// Verify an `X-Webhook-Signature: sha256=<hex>` header
pub fn verify_hex(secret: &str, body: &[u8], header: &str) -> bool {
    let hex_sig = header.trim().strip_prefix("sha256=").unwrap_or(header.trim());
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    match mac_over(secret, &[body]) {
        Some(mac) => mac.verify_slice(&expected).is_ok(),
        None => false,
    }
}

/// Verify a base64 HMAC over `timestamp || body`
pub fn verify_timestamped_base64(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    match mac_over(secret, &[timestamp.as_bytes(), body]) {
        Some(mac) => mac.verify_slice(&expected).is_ok(),
        None => false,
    }
}

/// Compute the base64 HMAC over `timestamp || body`
pub fn sign_timestamped_base64(secret: &str, timestamp: &str, body: &[u8]) -> String {
    match mac_over(secret, &[timestamp.as_bytes(), body]) {
        Some(mac) => STANDARD.encode(mac.finalize().into_bytes()),
        None => String::new(),
    }
}

/// Verify a hex HMAC over `timestamp || token`
pub fn verify_token_hex(key: &str, timestamp: &str, token: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    match mac_over(key, &[timestamp.as_bytes(), token.as_bytes()]) {
        Some(mac) => mac.verify_slice(&expected).is_ok(),
        None => false,
    }
}

pub fn sign_token_hex(key: &str, timestamp: &str, token: &str) -> String {
    match mac_over(key, &[timestamp.as_bytes(), token.as_bytes()]) {
        Some(mac) => hex::encode(mac.finalize().into_bytes()),
        None => String::new(),
    }
}
