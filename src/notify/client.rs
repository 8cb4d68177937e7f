use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

const TENANT_TOKEN_URL: &str = "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";
const MESSAGES_URL: &str = "https://open.feishu.cn/open-apis/im/v1/messages";

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn tenant_access_token(&self, app_id: &str, app_secret: &str) -> Result<String>;

    async fn send_text(&self, token: &str, receive_id: &str, text: &str) -> Result<()>;
}

pub struct FeishuClient {
    http: reqwest::Client,
}

impl FeishuClient {
    pub fn new() -> Self {
        FeishuClient { http: reqwest::Client::new() }
    }
}

impl Default for FeishuClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct TenantTokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Deserialize)]
struct TenantTokenResponse {
    code: i64,
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    receive_id: &'a str,
    msg_type: &'a str,
    /// JSON-encoded `{"text": ...}`.
    content: String,
    uuid: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    code: i64,
    msg: String,
}

#[async_trait]
impl ChatClient for FeishuClient {
    async fn tenant_access_token(&self, app_id: &str, app_secret: &str) -> Result<String> {
        let response = self
            .http
            .post(TENANT_TOKEN_URL)
            .json(&TenantTokenRequest { app_id, app_secret })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error! status: {}", response.status()));
        }

        let body: TenantTokenResponse = response.json().await?;
        if body.code != 0 {
            return Err(anyhow!("Tenant token request refused: {} {}", body.code, body.msg));
        }
        Ok(body.tenant_access_token)
    }

    async fn send_text(&self, token: &str, receive_id: &str, text: &str) -> Result<()> {
        let request = MessageRequest {
            receive_id,
            msg_type: "text",
            content: serde_json::json!({ "text": text }).to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
        };
        let response = self
            .http
            .post(MESSAGES_URL)
            .query(&[("receive_id_type", "open_id")])
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP error! status: {}, {}", status, body));
        }

        let body: MessageResponse = response.json().await?;
        if body.code != 0 {
            return Err(anyhow!("Message rejected: {} {}", body.code, body.msg));
        }
        debug!("Message delivered to {}", receive_id);
        Ok(())
    }
}
