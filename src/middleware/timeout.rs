//! Per-request deadline for the HTTP stack.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::context_of;
use crate::error::ErrorCode;
use crate::response;

/// Cuts off handlers that outlive the configured deadline.
pub async fn request_timeout(
    State(deadline): State<Duration>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = context_of(&req).request_id().to_string();
    let path = req.uri().path().to_string();

    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, deadline_secs = deadline.as_secs(), "request deadline exceeded");
            response::error_response(
                ErrorCode::ServiceUnavailable,
                "request timed out",
                &request_id,
            )
        }
    }
}
