//! HTTP middleware recording business events for unsafe requests.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use http::Method;
use tracing::debug;

use super::{client_ip, context_of, peer_addr};
use crate::audit::{AuditConfig, AuditEvent, AuditSink};

/// Shared state for the audit middleware.
#[derive(Clone)]
pub struct AuditLayer {
    /// Where events go.
    pub sink: Arc<dyn AuditSink>,
    /// Capture configuration.
    pub config: Arc<AuditConfig>,
}

/// Records one event per unsafe request: actor, action, resource, response
/// status and a capped copy of the request body. The handler always sees the
/// complete body regardless of the capture cap.
pub async fn audit_trail(State(layer): State<AuditLayer>, req: Request, next: Next) -> Response {
    let method = req.method();
    if !layer.config.enabled
        || method == Method::GET
        || method == Method::OPTIONS
        || layer
            .config
            .exclude_paths
            .iter()
            .any(|path| path == req.uri().path())
    {
        return next.run(req).await;
    }

    let started_at = Utc::now();
    let ctx = context_of(&req);
    let action = req.method().to_string();
    let resource = req.uri().path().to_string();
    let ip = client_ip(req.headers(), peer_addr(&req).ip());
    let user_agent = req
        .headers()
        .get(http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (parts, body) = req.into_parts();
    let (captured, req) = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let cap = layer.config.max_body_size.min(bytes.len());
            let captured = String::from_utf8_lossy(&bytes[..cap]).into_owned();
            (captured, Request::from_parts(parts, Body::from(bytes)))
        }
        Err(_) => (String::new(), Request::from_parts(parts, Body::empty())),
    };

    let response = next.run(req).await;

    let actor_id = if ctx.principal_id().is_empty() {
        "anonymous".to_string()
    } else {
        ctx.principal_id().to_string()
    };

    let mut event = AuditEvent::new(actor_id, action, resource)
        .with_trace_id(ctx.trace_id().to_string())
        .with_metadata("status", response.status().as_u16().to_string())
        .with_metadata("ip", ip)
        .with_metadata("user_agent", user_agent);
    event.timestamp = started_at;
    if !captured.is_empty() {
        event.new_value = Some(serde_json::Value::String(captured));
    }

    if let Err(err) = layer.sink.submit(event).await {
        // The sink has already counted and rate-limited its own distress.
        debug!(error = %err, "audit event not recorded");
    }

    response
}
