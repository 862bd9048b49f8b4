//! GitHub webhook receiver

use crate::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// Check a `sha256=<hex>` signature over the raw body
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// POST /webhook
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let Some(secret) = state.config.webhook.as_ref().map(|w| w.secret.as_str()) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    let event = headers.get(EVENT_HEADER).and_then(|h| h.to_str().ok());
    let (Some(signature), Some(event)) = (signature, event) else {
        return StatusCode::BAD_REQUEST;
    };

    if !verify_signature(secret, &body, signature) {
        warn!(event, "Webhook signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    info!(event, "Webhook received");
    StatusCode::ACCEPTED
}
