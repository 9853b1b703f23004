//! Uniform response envelope for transport-boundary errors.

use axum::response::{IntoResponse, Response};

use crate::error::{ChassisError, ErrorCode};

/// Builds the error envelope `{"error": {code, message, request_id}}` with
/// the status the code maps to.
pub fn error_response(code: ErrorCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": code.as_str(),
            "message": message,
            "request_id": request_id,
        }
    });
    (code.http_status(), axum::Json(body)).into_response()
}

/// Renders a [`ChassisError`] at the HTTP boundary, attaching a `Retry-After`
/// hint when the error carries one.
pub fn from_error(err: &ChassisError, request_id: &str) -> Response {
    let mut response = error_response(err.code(), &err.public_message(), request_id);
    if let Some(retry_after) = err.retry_after() {
        if let Ok(value) = retry_after.as_secs().to_string().parse() {
            response.headers_mut().insert(http::header::RETRY_AFTER, value);
        }
    }
    response
}
