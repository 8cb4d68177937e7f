use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::notify::NotifyError;
use crate::store::StoreError;

/// Everything a handler can fail with, already shaped for the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{error}")]
    Validation { error: String, details: Option<String> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(error: impl Into<String>) -> Self {
        ApiError::Validation { error: error.into(), details: None }
    }

    pub fn validation_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        ApiError::Validation { error: error.into(), details: Some(details.into()) }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::SendFailed(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::Validation { error, details: Some(details) } => {
                json!({ "error": error, "details": details })
            }
            ApiError::SendFailed(message) => {
                json!({ "error": "Failed to send email", "message": message })
            }
            other => json!({ "error": other.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("Not found: {}", what)),
            StoreError::Conflict(_) => ApiError::Conflict(err.to_string()),
            StoreError::InvalidTimestamp(value) => {
                ApiError::validation_details("Invalid receivedAt", value)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Store(e) => ApiError::from(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation_details("Invalid request body", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation_details("Invalid query parameters", rejection.body_text())
    }
}
