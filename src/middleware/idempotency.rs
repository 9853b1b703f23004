//! HTTP adapter for the idempotency gate: claim, capture, replay.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderValue, Method, StatusCode};
use tracing::{error, warn};

use super::{client_ip, context_of, peer_addr};
use crate::error::ErrorCode;
use crate::idempotency::{
    payload_fingerprint, ClaimOutcome, IdempotencyGate, IdempotencyRecord, RecordStatus,
};
use crate::response;

/// Marker header on replayed responses.
pub const HIT_HEADER: &str = "x-idempotency-hit";

/// Deletes a PROCESSING claim if the gated handler never reached a terminal
/// outcome — including the case where the request future is dropped because
/// the client went away mid-flight.
struct ReleaseGuard {
    gate: Arc<IdempotencyGate>,
    key: String,
    armed: bool,
}

impl ReleaseGuard {
    fn new(gate: Arc<IdempotencyGate>, key: String) -> Self {
        Self { gate, key, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // During runtime teardown there is nowhere to spawn; the lease
        // expiry covers that case.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let gate = self.gate.clone();
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move { gate.release(&key).await });
        }
    }
}

/// Applies the claim protocol to unsafe requests carrying the key header.
///
/// The gate fails closed: if the claim store cannot be reached the request
/// is refused with 503 rather than silently processed twice.
pub async fn idempotency(
    State(gate): State<Arc<IdempotencyGate>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return next.run(req).await;
    }
    let Some(client_key) = req
        .headers()
        .get(gate.header())
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
    else {
        return next.run(req).await;
    };

    let ctx = context_of(&req);
    let request_id = ctx.request_id().to_string();
    let owner = if ctx.principal_id().is_empty() {
        format!("ip:{}", client_ip(req.headers(), peer_addr(&req).ip()))
    } else {
        ctx.principal_id().to_string()
    };
    let storage_key = gate.storage_key(&owner, &client_key);

    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return response::error_response(
                ErrorCode::InvalidInput,
                "unreadable request body",
                &request_id,
            );
        }
    };
    let fingerprint = payload_fingerprint(&body_bytes);

    match gate.claim(&storage_key, &fingerprint).await {
        Ok(ClaimOutcome::Claimed) => {
            let mut guard = ReleaseGuard::new(gate.clone(), storage_key.clone());
            let req = Request::from_parts(parts, Body::from(body_bytes));
            let response = next.run(req).await;
            let outcome =
                capture_and_store(&gate, &mut guard, &storage_key, &fingerprint, response).await;
            outcome.unwrap_or_else(|| {
                response::error_response(
                    ErrorCode::Internal,
                    "response capture failed",
                    &request_id,
                )
            })
        }
        Ok(ClaimOutcome::InProgress) => in_progress_response(&request_id),
        Ok(ClaimOutcome::FingerprintConflict) => response::error_response(
            ErrorCode::Conflict,
            "idempotency key reused with a different payload",
            &request_id,
        ),
        Ok(ClaimOutcome::FingerprintMatch) => replay(&gate, &storage_key, &request_id).await,
        Err(err) => {
            error!(error = %err, "idempotency store unreachable, failing closed");
            response::error_response(
                ErrorCode::ServiceUnavailable,
                "idempotency store unavailable",
                &request_id,
            )
        }
    }
}

/// Captures the handler's response. Terminal statuses (2xx/4xx) are stored
/// for replay; anything else releases the claim so the client may retry.
async fn capture_and_store(
    gate: &Arc<IdempotencyGate>,
    guard: &mut ReleaseGuard,
    storage_key: &str,
    fingerprint: &str,
    response: Response,
) -> Option<Response> {
    let status = response.status();
    let (parts, body) = response.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to buffer response for capture");
            return None;
        }
    };

    if status.is_success() || status.is_client_error() {
        let content_type = parts
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let record =
            IdempotencyRecord::completed(fingerprint, status.as_u16(), content_type, &body_bytes);
        match gate.complete(storage_key, &record).await {
            Ok(()) => guard.disarm(),
            Err(err) => {
                // Leave the guard armed: the claim is deleted and a retry
                // can run the handler again rather than stall on the lease.
                warn!(error = %err, "failed to store idempotency record");
            }
        }
    } else {
        gate.release(storage_key).await;
        guard.disarm();
    }

    Some(Response::from_parts(parts, Body::from(body_bytes)))
}

async fn replay(gate: &Arc<IdempotencyGate>, storage_key: &str, request_id: &str) -> Response {
    match gate.load(storage_key).await {
        Ok(Some(record)) if record.status == RecordStatus::Completed => {
            let status = record
                .status_code
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);
            let mut builder = Response::builder().status(status);
            if let Some(content_type) = &record.content_type {
                builder = builder.header(http::header::CONTENT_TYPE, content_type);
            }
            builder = builder.header(HIT_HEADER, "true");
            builder
                .body(Body::from(record.body_bytes()))
                .unwrap_or_else(|_| {
                    response::error_response(
                        ErrorCode::Internal,
                        "stored response is unreplayable",
                        request_id,
                    )
                })
        }
        Ok(_) => {
            // The record vanished or regressed between claim and load; tell
            // the client to retry shortly.
            warn!(key = %storage_key, "completed record missing at replay time");
            in_progress_response(request_id)
        }
        Err(err) => {
            error!(error = %err, "idempotency store unreachable during replay");
            response::error_response(
                ErrorCode::ServiceUnavailable,
                "idempotency store unavailable",
                request_id,
            )
        }
    }
}

fn in_progress_response(request_id: &str) -> Response {
    let mut response = response::error_response(
        ErrorCode::Conflict,
        "request with this idempotency key is already in progress",
        request_id,
    );
    response
        .headers_mut()
        .insert(http::header::RETRY_AFTER, HeaderValue::from_static("5"));
    response
}
