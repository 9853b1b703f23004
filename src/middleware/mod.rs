//! HTTP ingress middleware.
//!
//! Composition order matters; outermost first:
//!
//! 1. [`security::security_headers`]
//! 2. [`trace::trace_context`] — everything downstream can correlate
//! 3. [`recovery::recover_panics`]
//! 4. [`auth::authenticate`]
//! 5. [`rate_limit::rate_limit`] — sees the authenticated principal
//! 6. [`idempotency::idempotency`]
//! 7. [`audit::audit_trail`]
//!
//! With `axum`, apply them with `axum::middleware::from_fn` /
//! `from_fn_with_state`, remembering that the layer added last runs first.

pub mod audit;
pub mod auth;
pub mod idempotency;
pub mod rate_limit;
pub mod recovery;
pub mod security;
pub mod timeout;
pub mod trace;

use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::ConnectInfo;
use axum::extract::Request;
use http::HeaderMap;

use crate::auth::UNKNOWN_PEER;
use crate::context::RequestContext;

/// Extracts the real client IP.
///
/// Trust boundary: `X-Forwarded-For` and `X-Real-IP` are only meaningful
/// behind a trusted ingress; the first forwarded hop is taken as the client.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        return real_ip.to_string();
    }

    peer.to_string()
}

/// The transport peer address, when the listener recorded one.
pub(crate) fn peer_addr(req: &Request) -> SocketAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
        .unwrap_or(UNKNOWN_PEER)
}

/// The request's context scope, or an empty root scope before correlation.
pub(crate) fn context_of(req: &Request) -> RequestContext {
    req.extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default()
}
