use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{RequireApiToken, RequireBearer};
use crate::mail::message::{decode_stored, parse_raw, ParsedMessage};
use crate::mail::outbound::{send_and_store, OutboundError, SendRequest};
use crate::mail::{Direction, InboundEmail, ListFilter, MailRecord};
use crate::notify::NewMail;
use crate::web::error::ApiError;
use crate::web::extract::{ApiJson, ApiQuery};
use crate::web::handlers::{message, PageQuery};
use crate::web::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub to: Option<String>,
    pub from: Option<String>,
    /// Unix seconds.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDelete {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// A stored record with its raw message expanded.
#[derive(Debug, Serialize)]
pub struct MailDetail {
    pub id: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub starred: bool,
    pub read: bool,
    #[serde(flatten)]
    pub parsed: ParsedMessage,
}

impl MailDetail {
    fn from_record(record: MailRecord) -> Result<Self, ApiError> {
        let parsed = parse_raw(&decode_stored(&record.raw_email)).map_err(|e| {
            error!("Cannot parse stored email {}: {}", record.id, e);
            ApiError::Internal(format!("Cannot parse email {}", record.id))
        })?;
        Ok(MailDetail {
            id: record.id,
            direction: record.direction,
            starred: record.starred,
            read: record.read,
            parsed,
        })
    }
}

pub async fn ingest(
    _: RequireApiToken,
    State(state): State<AppState>,
    ApiJson(inbound): ApiJson<InboundEmail>,
) -> Result<impl IntoResponse, ApiError> {
    if inbound.from.is_empty() || inbound.to.is_empty() || inbound.raw_email.is_empty() {
        return Err(ApiError::validation_details(
            "Missing required fields",
            "from, to, and rawEmail are required",
        ));
    }
    let record = inbound
        .into_record(Utc::now())
        .map_err(|e| ApiError::validation_details("Invalid receivedAt", e.to_string()))?;
    state.mails.store(&record).await?;
    info!("Stored inbound email {} for {}", record.id, record.to);

    if state.config.mail.notify_on_receive {
        match state.notifier.notify_new_mail(&NewMail::from(&record)).await {
            Ok(outcome) => info!("Notification for {}: {:?}", record.id, outcome),
            Err(e) => warn!("Notification for {} failed: {}", record.id, e),
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Email stored successfully", "emailId": record.id })),
    ))
}

pub async fn list(
    _: RequireBearer,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter: ListFilter = query
        .kind
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::validation("Invalid type parameter"))?;
    let (page, page_size) = PageQuery { page: query.page, page_size: query.page_size }.resolve()?;

    if let ListFilter::Direction(direction) = filter {
        state.mails.evict(direction, state.config.mail.max_emails).await?;
    }
    let page = state.mails.list(filter, page, page_size).await?;

    Ok(Json(json!({
        "emails": page.items,
        "total": page.total,
        "page": page.page,
        "pageSize": page.page_size,
        "totalPages": page.total_pages,
    })))
}

pub async fn latest(
    _: RequireApiToken,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LatestQuery>,
) -> Result<Json<MailDetail>, ApiError> {
    let (Some(to), Some(from), Some(timestamp)) = (query.to, query.from, query.timestamp) else {
        return Err(ApiError::validation_details(
            "Missing required parameters",
            "to, from, and timestamp are required",
        ));
    };
    let since = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| ApiError::validation("Invalid timestamp"))?;

    let record = state
        .mails
        .latest_matching(&to, &from, since)
        .await?
        .ok_or_else(|| ApiError::NotFound("No matching email".to_string()))?;
    Ok(Json(MailDetail::from_record(record)?))
}

pub async fn detail(
    _: RequireBearer,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MailDetail>, ApiError> {
    let record = state.mails.get_by_id(&id, None).await?;
    Ok(Json(MailDetail::from_record(record)?))
}

pub async fn remove(
    _: RequireBearer,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.mails.delete(&id, None).await? {
        info!("Email {} was already gone", id);
    }
    Ok(message("Email deleted successfully"))
}

pub async fn batch_delete(
    _: RequireBearer,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<BatchDelete>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.mails.batch_delete(&body.ids).await?;
    Ok(Json(json!({ "message": "Emails deleted successfully", "deleted": deleted })))
}

pub async fn toggle_star(
    _: RequireBearer,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let starred = state.mails.toggle_star(&id).await?;
    let text = if starred { "Email starred" } else { "Email unstarred" };
    Ok(Json(json!({ "message": text, "starred": starred })))
}

pub async fn send(
    _: RequireBearer,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    if !request.is_complete() {
        return Err(ApiError::validation_details(
            "Missing required fields",
            "from, to, and subject are required",
        ));
    }

    let (receipt, record) = send_and_store(
        state.sender.as_ref(),
        &state.mails,
        &request,
        &state.config.mail.message_id_domain,
    )
    .await
    .map_err(|e| match e {
        OutboundError::Send(e) => ApiError::SendFailed(e.to_string()),
        OutboundError::Store(e) => ApiError::from(e),
    })?;

    Ok(Json(json!({
        "message": "Email sent successfully",
        "id": receipt.id,
        "emailId": record.id,
    })))
}
