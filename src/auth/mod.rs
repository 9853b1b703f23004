//! Pluggable authentication strategies over a transport-neutral payload.
//!
//! Transport adapters normalize HTTP requests and RPC invocations into one
//! [`AuthPayload`] shape; strategies see only the payload and the request
//! context, never the transport.

mod bearer;
mod gateway;

pub use bearer::BearerStrategy;
pub use gateway::{GatewayHeaders, TrustedGatewayStrategy};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use http::HeaderMap;

use crate::context::RequestContext;
use crate::error::ChassisError;

/// Peer address used when the transport cannot report one.
pub const UNKNOWN_PEER: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone)]
pub struct AuthPayload {
    /// Canonicalized request headers (RPC metadata is mapped to header form).
    pub headers: HeaderMap,
    /// Transport-level peer address.
    pub remote_addr: SocketAddr,
    /// Request method; empty for RPC invocations.
    pub method: String,
    /// Request path; empty for RPC invocations.
    pub path: String,
}

impl AuthPayload {
    /// Returns the first value of `name` as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The peer IP without the port.
    pub fn peer_ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }
}

/// A pluggable authentication capability.
///
/// On success the strategy returns a derived context hydrated with the
/// verified identity; the input context is left untouched.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Authenticates the payload, hydrating `ctx` on success.
    async fn authenticate(
        &self,
        ctx: RequestContext,
        payload: &AuthPayload,
    ) -> Result<RequestContext, ChassisError>;
}
