use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use log::warn;

use crate::settings::AuthConfig;
use crate::web::error::ApiError;
use crate::web::AppState;

pub mod token;

/// How a route proves who is calling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <jwt>` issued by the login endpoint.
    Bearer,
    /// `Authorization: Bearer <api_token>`, compared verbatim.
    StaticToken,
}

impl AuthScheme {
    pub fn authorize(&self, headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

        let allowed = match (self, header) {
            (_, None) => false,
            (AuthScheme::Bearer, Some(value)) => value
                .strip_prefix("Bearer ")
                .map(|token| state.tokens.verify(token))
                .unwrap_or(false),
            (AuthScheme::StaticToken, Some(value)) => value
                .strip_prefix("Bearer ")
                .map(|token| state.tokens.secure_eq(&state.config.auth.api_token, token))
                .unwrap_or(false),
        };

        if allowed {
            Ok(())
        } else {
            warn!("{:?} authentication failed", self);
            Err(ApiError::Unauthorized)
        }
    }
}

/// Extractor guard for routes used by the web client.
pub struct RequireBearer;

/// Extractor guard for machine-to-machine routes such as mail ingestion.
pub struct RequireApiToken;

#[async_trait]
impl FromRequestParts<AppState> for RequireBearer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        AuthScheme::Bearer.authorize(&parts.headers, state)?;
        Ok(RequireBearer)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireApiToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        AuthScheme::StaticToken.authorize(&parts.headers, state)?;
        Ok(RequireApiToken)
    }
}

pub fn check_login(config: &AuthConfig, username: &str, password: &str) -> bool {
    username == config.username && password == config.password
}
