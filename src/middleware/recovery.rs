//! Panic recovery for HTTP handlers.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use futures::FutureExt;
use tracing::error;

use super::context_of;
use crate::error::ErrorCode;
use crate::response;

/// Catches handler panics, logs them with request coordinates, and answers
/// with the internal-error envelope. The process keeps serving.
pub async fn recover_panics(req: Request, next: Next) -> Response {
    let request_id = context_of(&req).request_id().to_string();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(
                method = %method,
                path = %path,
                panic = %panic_message(&panic),
                "handler panicked"
            );
            response::error_response(
                ErrorCode::Internal,
                "an unexpected error occurred",
                &request_id,
            )
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
