use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, info};
use serde::Deserialize;
use serde_json::json;

use crate::auth::check_login;
use crate::web::error::ApiError;
use crate::web::extract::ApiJson;
use crate::web::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(credentials): ApiJson<LoginRequest>,
) -> Result<Response, ApiError> {
    if !check_login(&state.config.auth, &credentials.username, &credentials.password) {
        info!("Login failed: invalid credentials");
        let body = json!({ "success": false, "error": "Invalid credentials" });
        return Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response());
    }

    let token = state.tokens.issue(&credentials.username).map_err(|e| {
        error!("Cannot issue token: {}", e);
        ApiError::Internal(e.to_string())
    })?;
    info!("User logged in: {}", credentials.username);

    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": { "username": credentials.username },
    }))
    .into_response())
}
