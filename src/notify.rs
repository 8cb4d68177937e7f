use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::mail::message::{decode_stored, parse_raw};
use crate::mail::MailRecord;
use crate::store::setting::SettingsStore;
use crate::store::StoreError;

pub mod cipher;
pub mod client;
pub mod webhook;

use client::ChatClient;

/// Settings store key holding [`FeishuSettings`] as JSON.
pub const SETTINGS_KEY: &str = "feishu";

const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuSettings {
    pub app_id: String,
    pub app_secret: String,
    pub verification_token: String,
    pub encrypt_key: String,
    /// open_id of the chat user that receives notifications.
    pub receive_id: String,
    /// Recipient addresses that trigger a notification.
    #[serde(default)]
    pub emails: Vec<String>,
}

/// Summary of a newly received message.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMail {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    /// Base64 raw message.
    #[serde(default)]
    pub content: String,
}

impl From<&MailRecord> for NewMail {
    fn from(record: &MailRecord) -> Self {
        NewMail {
            from: record.from.clone(),
            to: record.to.clone(),
            subject: record.subject.clone(),
            content: record.raw_email.clone(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    NotConfigured,
    NotListed,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("Invalid feishu settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),
    #[error("Failed to send notification: {0}")]
    Delivery(#[source] anyhow::Error),
}

/// Bare address out of `Name <user@host>` or `user@host`, lowercased.
pub fn extract_address(value: &str) -> String {
    let addr = match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value,
    };
    addr.trim().to_lowercase()
}

pub fn format_notification(mail: &NewMail) -> String {
    let parsed = parse_raw(&decode_stored(&mail.content)).ok();
    let time = parsed
        .as_ref()
        .and_then(|p| p.date.clone())
        .unwrap_or_else(|| Utc::now().to_rfc3339());
    let content: String = parsed
        .and_then(|p| p.text.or(p.html))
        .map(|body| body.trim().chars().take(PREVIEW_CHARS).collect())
        .filter(|body: &String| !body.is_empty())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "{} received new mail\nSubject: {}\nFrom: {}\nTime: {}\nContent: {}",
        mail.to, mail.subject, mail.from, time, content
    )
}

pub async fn load_settings(store: &SettingsStore) -> Result<Option<FeishuSettings>, NotifyError> {
    match store.get(SETTINGS_KEY).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[derive(Clone)]
pub struct Notifier {
    settings: SettingsStore,
    client: Arc<dyn ChatClient>,
}

impl Notifier {
    pub fn new(settings: SettingsStore, client: Arc<dyn ChatClient>) -> Self {
        Notifier { settings, client }
    }

    pub async fn notify_new_mail(&self, mail: &NewMail) -> Result<NotifyOutcome, NotifyError> {
        let Some(feishu) = load_settings(&self.settings).await? else {
            return Ok(NotifyOutcome::NotConfigured);
        };

        let recipient = extract_address(&mail.to);
        if !feishu.emails.iter().any(|e| extract_address(e) == recipient) {
            info!("{} is not in the notification list", recipient);
            return Ok(NotifyOutcome::NotListed);
        }

        let text = format_notification(mail);
        let token = self
            .client
            .tenant_access_token(&feishu.app_id, &feishu.app_secret)
            .await
            .map_err(NotifyError::Delivery)?;
        self.client
            .send_text(&token, &feishu.receive_id, &text)
            .await
            .map_err(|e| {
                warn!("Notification for {} failed: {}", recipient, e);
                NotifyError::Delivery(e)
            })?;

        info!("Notified {} about mail to {}", feishu.receive_id, recipient);
        Ok(NotifyOutcome::Sent)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::store::Database;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeChat {
        pub messages: Mutex<Vec<(String, String)>>,
        pub fail_token: bool,
    }

    #[async_trait]
    impl ChatClient for FakeChat {
        async fn tenant_access_token(&self, app_id: &str, _app_secret: &str) -> anyhow::Result<String> {
            if self.fail_token {
                return Err(anyhow!("HTTP error! status: 500"));
            }
            Ok(format!("t-{}", app_id))
        }

        async fn send_text(&self, token: &str, receive_id: &str, text: &str) -> anyhow::Result<()> {
            assert_eq!(token, "t-cli_1");
            self.messages.lock().unwrap().push((receive_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    pub fn feishu_settings(emails: &[&str]) -> String {
        serde_json::json!({
            "app_id": "cli_1",
            "app_secret": "secret",
            "verification_token": "vtoken",
            "encrypt_key": "ekey",
            "receive_id": "ou_1",
            "emails": emails,
        })
        .to_string()
    }

    fn mail(to: &str) -> NewMail {
        let raw = "From: a@x.com\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\nSubject: Code\r\n\r\nYour code is 1234\r\n";
        NewMail {
            from: "a@x.com".to_string(),
            to: to.to_string(),
            subject: "Code".to_string(),
            content: BASE64.encode(raw),
        }
    }

    async fn notifier(settings: Option<String>, chat: Arc<FakeChat>) -> Notifier {
        let store = SettingsStore::new(Database::open_in_memory().unwrap());
        if let Some(value) = settings {
            store.upsert(SETTINGS_KEY, &value).await.unwrap();
        }
        Notifier::new(store, chat)
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(extract_address("Bob <Bob@Example.com>"), "bob@example.com");
        assert_eq!(extract_address(" otp@seedmail.com "), "otp@seedmail.com");
    }

    #[test]
    fn test_format_notification_uses_parsed_body() {
        let text = format_notification(&mail("otp@seedmail.com"));
        assert!(text.starts_with("otp@seedmail.com received new mail\n"));
        assert!(text.contains("Subject: Code"));
        assert!(text.contains("Time: Mon, 1 Jan 2024 00:00:00 +0000"));
        assert!(text.ends_with("Content: Your code is 1234"));
    }

    #[tokio::test]
    async fn test_listed_recipient_notified() {
        let chat = Arc::new(FakeChat::default());
        let notifier = notifier(Some(feishu_settings(&["otp@seedmail.com"])), chat.clone()).await;

        let outcome = notifier.notify_new_mail(&mail("OTP <otp@seedmail.com>")).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::Sent);
        let messages = chat.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "ou_1");
    }

    #[tokio::test]
    async fn test_unlisted_or_unconfigured_skipped() {
        let chat = Arc::new(FakeChat::default());
        let unlisted = notifier(Some(feishu_settings(&["other@seedmail.com"])), chat.clone()).await;
        assert_eq!(
            unlisted.notify_new_mail(&mail("otp@seedmail.com")).await.unwrap(),
            NotifyOutcome::NotListed
        );

        let unconfigured = notifier(None, chat.clone()).await;
        assert_eq!(
            unconfigured.notify_new_mail(&mail("otp@seedmail.com")).await.unwrap(),
            NotifyOutcome::NotConfigured
        );
        assert!(chat.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_failure_is_delivery_error() {
        let chat = Arc::new(FakeChat { fail_token: true, ..Default::default() });
        let notifier = notifier(Some(feishu_settings(&["otp@seedmail.com"])), chat).await;
        assert!(matches!(
            notifier.notify_new_mail(&mail("otp@seedmail.com")).await,
            Err(NotifyError::Delivery(_))
        ));
    }
}
