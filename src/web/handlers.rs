use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::web::error::ApiError;

pub mod auth;
pub mod emails;
pub mod feishu;
pub mod setting;
pub mod users;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    /// `(page, page_size)` with defaults applied; both must be positive.
    pub fn resolve(&self) -> Result<(u32, u32), ApiError> {
        let page = self.page.unwrap_or(DEFAULT_PAGE);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 || page_size == 0 {
            return Err(ApiError::validation("page and pageSize must be positive"));
        }
        Ok((page, page_size))
    }
}

pub fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("Not Found".to_string())
}
