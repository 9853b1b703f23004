//! HTTP adapter feeding the pluggable authentication strategies.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::{context_of, peer_addr};
use crate::auth::{AuthPayload, AuthStrategy};
use crate::response;

/// Builds the transport-neutral payload and delegates to the configured
/// strategy; on success the hydrated context replaces the request scope.
pub async fn authenticate(
    State(strategy): State<Arc<dyn AuthStrategy>>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = context_of(&req);
    let payload = AuthPayload {
        headers: req.headers().clone(),
        remote_addr: peer_addr(&req),
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    };

    match strategy.authenticate(ctx, &payload).await {
        Ok(hydrated) => {
            req.extensions_mut().insert(hydrated);
            next.run(req).await
        }
        Err(err) => {
            warn!(
                path = %payload.path,
                peer = %payload.remote_addr,
                error = %err,
                "authentication failed"
            );
            response::from_error(&err, context_of(&req).request_id())
        }
    }
}
