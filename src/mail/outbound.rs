use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::mail::{format_timestamp, AuthResult, Direction, MailRecord};
use crate::store::mail::MailStore;
use crate::store::StoreError;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    /// HTML body.
    #[serde(default)]
    pub content: String,
}

impl SendRequest {
    pub fn is_complete(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty() && !self.subject.is_empty()
    }
}

/// What the provider hands back for an accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("{0}")]
    Send(#[from] SendError),
    #[error("{0}")]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, SendError>;
}

pub struct ResendClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl ResendClient {
    pub fn new(api_key: String) -> Self {
        ResendClient {
            http: reqwest::Client::new(),
            api_key,
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
impl MailSender for ResendClient {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, SendError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ResendPayload {
                from: &request.from,
                to: [&request.to],
                subject: &request.subject,
                html: &request.content,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected { status: status.as_u16(), body });
        }
        Ok(response.json::<SendReceipt>().await?)
    }
}

/// Builds the RFC 5322 form of a sent message, so sent and received records
/// can be parsed the same way.
pub fn compose_raw(request: &SendRequest, message_id: &str, now: DateTime<Utc>) -> String {
    [
        format!("From: {}", request.from),
        format!("To: {}", request.to),
        format!("Subject: {}", request.subject),
        format!("Message-ID: {}", message_id),
        format!("Date: {}", now.to_rfc2822()),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/html; charset=UTF-8".to_string(),
        "Content-Transfer-Encoding: base64".to_string(),
        String::new(),
        BASE64.encode(request.content.as_bytes()),
    ]
    .join("\r\n")
}

pub async fn send_and_store(
    sender: &dyn MailSender,
    store: &MailStore,
    request: &SendRequest,
    message_id_domain: &str,
) -> Result<(SendReceipt, MailRecord), OutboundError> {
    let receipt = sender.send(request).await.map_err(|e| {
        error!("Sending mail to {} failed: {}", request.to, e);
        e
    })?;
    info!("Mail to {} accepted by provider: {:?}", request.to, receipt.id);

    let now = Utc::now();
    let id = receipt.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let message_id = format!("<{}@{}>", id, message_id_domain);
    let raw = compose_raw(request, &message_id, now);

    let mut headers = BTreeMap::new();
    headers.insert("message-id".to_string(), message_id);
    headers.insert("date".to_string(), now.to_rfc2822());

    let record = MailRecord {
        id,
        from: request.from.clone(),
        to: request.to.clone(),
        subject: request.subject.clone(),
        received_at: format_timestamp(now),
        spf_status: AuthResult::Pass,
        dkim_status: AuthResult::Pass,
        dmarc_status: AuthResult::Pass,
        headers,
        size: raw.len() as i64,
        raw_email: BASE64.encode(raw.as_bytes()),
        direction: Direction::Sent,
        starred: false,
        read: true,
    };
    store.store(&record).await?;

    Ok((receipt, record))
}
