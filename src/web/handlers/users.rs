use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::RequireBearer;
use crate::web::error::ApiError;
use crate::web::extract::ApiQuery;
use crate::web::handlers::{message, PageQuery};
use crate::web::AppState;

pub async fn list(
    _: RequireBearer,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let (page, page_size) = query.resolve()?;
    let page = state.users.list(page, page_size).await?;
    Ok(Json(json!({
        "recipients": page.items,
        "total": page.total,
        "page": page.page,
        "pageSize": page.page_size,
        "totalPages": page.total_pages,
    })))
}

pub async fn remove(
    _: RequireBearer,
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.users.delete(&email).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    Ok(message("User deleted successfully"))
}
