//! Correlation-id middleware.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::context::{EntryPoint, RequestContext};

/// Header carrying the call-chain correlation id.
pub const TRACE_HEADER: &str = "x-trace-id";
/// Header carrying the per-hop request id.
pub const REQUEST_HEADER: &str = "x-request-id";

/// Honours inbound correlation headers, generates what is missing, seeds the
/// request context, and echoes both ids on the response.
pub async fn trace_context(mut req: Request, next: Next) -> Response {
    let trace_id = inbound(&req, TRACE_HEADER)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let request_id = inbound(&req, REQUEST_HEADER).unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext::new()
        .with_entry_point(EntryPoint::Http)
        .with_trace_id(trace_id.clone())
        .with_request_id(request_id.clone());
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    echo(&mut response, TRACE_HEADER, &trace_id);
    echo(&mut response, REQUEST_HEADER, &request_id);
    response
}

fn inbound(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn echo(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = value.parse() {
        response
            .headers_mut()
            .insert(http::header::HeaderName::from_static(name), value);
    }
}
