//! HTTP adapter for the rate gate.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;

use super::{client_ip, context_of, peer_addr};
use crate::error::ErrorCode;
use crate::ratelimit::{RateGate, RateOutcome};
use crate::response;

/// Header advertising the configured limit.
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Marker set when the local fallback made the admission call.
pub const FALLBACK_HEADER: &str = "x-ratelimit-fallback";

/// Admits or rejects the request based on the caller's identity.
///
/// Identity prefers the authenticated principal over the client IP, so the
/// gate must run after authentication to be per-principal.
pub async fn rate_limit(
    State(gate): State<Arc<RateGate>>,
    req: Request,
    next: Next,
) -> Response {
    let ctx = context_of(&req);
    let identity = if ctx.principal_id().is_empty() {
        format!("ip:{}", client_ip(req.headers(), peer_addr(&req).ip()))
    } else {
        format!("user:{}", ctx.principal_id())
    };

    match gate.admit(&identity).await {
        RateOutcome::Allow { limit, fallback } => {
            let mut response = next.run(req).await;
            if limit > 0 {
                set_header(&mut response, LIMIT_HEADER, &limit.to_string());
            }
            if fallback {
                set_header(&mut response, FALLBACK_HEADER, "true");
            }
            response
        }
        RateOutcome::Deny { retry_after, limit } => {
            let mut response = response::error_response(
                ErrorCode::RateLimited,
                "rate limit exceeded",
                ctx.request_id(),
            );
            set_header(
                &mut response,
                "retry-after",
                &retry_after.as_secs().to_string(),
            );
            set_header(&mut response, LIMIT_HEADER, &limit.to_string());
            response
        }
        RateOutcome::Shed => response::error_response(
            ErrorCode::ServiceUnavailable,
            "rate limiter degraded, request shed",
            ctx.request_id(),
        ),
    }
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response
            .headers_mut()
            .insert(http::header::HeaderName::from_static(name), value);
    }
}
