use axum::extract::{FromRequest, FromRequestParts};

use crate::web::error::ApiError;

/// `Json` whose rejection is an [`ApiError`], so bad bodies get the usual
/// `{"error": ...}` shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
