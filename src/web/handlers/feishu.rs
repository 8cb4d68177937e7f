use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::Json;
use log::{error, info};
use serde_json::{json, Value};

use crate::auth::RequireApiToken;
use crate::notify::webhook::{handle_webhook, WebhookOutcome};
use crate::notify::{load_settings, NewMail, NotifyOutcome};
use crate::web::error::ApiError;
use crate::web::extract::ApiJson;
use crate::web::handlers::message;
use crate::web::AppState;

fn settings_not_found() -> ApiError {
    ApiError::NotFound("Feishu settings not found".to_string())
}

/// Feishu event subscription callback. Public; trust comes from the
/// signature and the verification token.
pub async fn event(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let settings = load_settings(&state.settings).await?.ok_or_else(settings_not_found)?;

    match handle_webhook(&method, &headers, &body, &settings) {
        Ok(WebhookOutcome::Challenge(challenge)) => {
            info!("Answering Feishu URL verification");
            Ok(Json(json!({ "challenge": challenge })))
        }
        Ok(WebhookOutcome::Event(envelope)) => {
            let header = &envelope.header;
            info!("Feishu event {} ({}) for app {}", header.event_id, header.event_type, header.app_id);
            Ok(Json(json!({ "code": 0 })))
        }
        Err(rejected) => Err(ApiError::validation(rejected.to_string())),
    }
}

pub async fn notify(
    _: RequireApiToken,
    State(state): State<AppState>,
    ApiJson(mail): ApiJson<NewMail>,
) -> Result<Json<Value>, ApiError> {
    match state.notifier.notify_new_mail(&mail).await {
        Ok(NotifyOutcome::Sent) => Ok(message("Notification sent")),
        Ok(NotifyOutcome::NotConfigured) => Err(settings_not_found()),
        Ok(NotifyOutcome::NotListed) => {
            Err(ApiError::Forbidden("Email not in notification list".to_string()))
        }
        Err(e) => {
            error!("Notification failed: {}", e);
            Err(ApiError::from(e))
        }
    }
}
