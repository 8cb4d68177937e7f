use axum::extract::State;
use axum::Json;
use serde_json::{Map, Value};

use crate::auth::RequireBearer;
use crate::web::error::ApiError;
use crate::web::extract::ApiJson;
use crate::web::handlers::message;
use crate::web::AppState;

/// Every stored setting, with values decoded back to JSON where possible.
pub async fn get(
    _: RequireBearer,
    State(state): State<AppState>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let settings = state
        .settings
        .all()
        .await?
        .into_iter()
        .map(|(key, raw)| {
            let value = match raw {
                Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                None => Value::Null,
            };
            (key, value)
        })
        .collect();
    Ok(Json(settings))
}

/// Replaces the whole settings table with the posted object.
pub async fn replace(
    _: RequireBearer,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let entries: Vec<(String, String)> =
        body.into_iter().map(|(key, value)| (key, value.to_string())).collect();
    state.settings.replace_all(&entries).await?;
    Ok(message("Settings saved successfully"))
}
