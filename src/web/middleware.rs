use axum::extract::Request;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::{error, info};
use std::time::Instant;

pub const CORS_HEADERS: [(HeaderName, &str); 4] = [
    (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, PUT, DELETE, OPTIONS"),
    (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization, X-Requested-With"),
    (ACCESS_CONTROL_MAX_AGE, "86400"),
];

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Answers preflights and stamps the CORS headers on every response.
pub async fn cors(request: Request, next: Next) -> Response {
    let mut response = if *request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}

/// Per-request access log through `log`, so it lands in the fern dispatch
/// with everything else; no `tracing` subscriber is installed.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    info!("[{}] {} {}", request_id, method, path);

    let mut response = next.run(request).await;

    let status = response.status();
    if status.is_server_error() {
        error!("[{}] {} {} -> {} in {:?}", request_id, method, path, status, started.elapsed());
    } else {
        info!("[{}] {} {} -> {} in {:?}", request_id, method, path, status, started.elapsed());
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}
