use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method};
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::notify::cipher::AesCipher;
use crate::notify::FeishuSettings;

pub const SIGNATURE_HEADER: &str = "x-lark-signature";
pub const TIMESTAMP_HEADER: &str = "x-lark-request-timestamp";
pub const NONCE_HEADER: &str = "x-lark-request-nonce";

/// Every rejection looks the same to the caller; the reason is only logged.
#[derive(Debug, Error)]
#[error("Invalid request")]
pub struct InvalidRequest(pub &'static str);

#[derive(Debug, Default, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub app_id: String,
}

/// Only the header is inspected; the event body is acknowledged unread.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    pub header: EventHeader,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    /// URL verification handshake; the value is echoed back.
    Challenge(String),
    Event(EventEnvelope),
}

fn reject(reason: &'static str) -> InvalidRequest {
    warn!("Webhook rejected: {}", reason);
    InvalidRequest(reason)
}

pub fn handle_webhook(
    method: &Method,
    headers: &HeaderMap,
    body: &str,
    settings: &FeishuSettings,
) -> Result<WebhookOutcome, InvalidRequest> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if *method != Method::POST || !content_type.contains("application/json") {
        return Err(reject("not a JSON POST"));
    }

    let cipher = AesCipher::new(&settings.encrypt_key);
    let mut data: Value = serde_json::from_str(body).map_err(|_| reject("body is not JSON"))?;
    if let Some(encrypted) = data.get("encrypt").and_then(Value::as_str) {
        let plaintext = cipher.decrypt(encrypted).map_err(|e| {
            warn!("Event decryption failed: {}", e);
            reject("cannot decrypt event")
        })?;
        data = serde_json::from_str(&plaintext).map_err(|_| reject("decrypted event is not JSON"))?;
    }

    // The binding handshake is sent unsigned.
    if let Some(signature) = headers.get(SIGNATURE_HEADER) {
        let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
        let nonce = headers.get(NONCE_HEADER).and_then(|v| v.to_str().ok());
        let (Some(timestamp), Some(nonce)) = (timestamp, nonce) else {
            return Err(reject("signature without timestamp or nonce"));
        };
        if cipher.signature(timestamp, nonce, body).as_bytes() != signature.as_bytes() {
            return Err(reject("signature mismatch"));
        }
    }

    if data.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = data
            .get("challenge")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(WebhookOutcome::Challenge(challenge));
    }

    let envelope: EventEnvelope =
        serde_json::from_value(data).map_err(|_| reject("event has no header"))?;
    if envelope.header.token != settings.verification_token {
        return Err(reject("verification token mismatch"));
    }
    Ok(WebhookOutcome::Event(envelope))
}
