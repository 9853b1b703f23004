//! RPC-side ingress adapters.
//!
//! [`RpcIngress`] normalizes a tonic invocation into the same
//! [`AuthPayload`] the HTTP adapter produces, runs the configured strategy
//! and rate gate, and hands the handler a hydrated [`RequestContext`].
//! Service implementations call it first thing:
//!
//! ```ignore
//! async fn create_order(&self, req: Request<CreateOrder>) -> Result<Response<Order>, Status> {
//!     let ctx = self.ingress.admit(&req).await?;
//!     // ...
//! }
//! ```
//!
//! [`RpcRecoveryLayer`] is a tower layer for the tonic server that converts
//! handler panics into `INTERNAL` instead of tearing the connection down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use http::HeaderValue;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tower::{Layer, Service};
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::{AuthPayload, AuthStrategy, UNKNOWN_PEER};
use crate::context::{EntryPoint, RequestContext};
use crate::ratelimit::{RateGate, RateOutcome};

/// Metadata key mirroring the HTTP `Retry-After` hint.
pub const RETRY_AFTER_KEY: &str = "x-retry-after";
/// Metadata key mirroring the HTTP rate-limit advertisement.
pub const LIMIT_KEY: &str = "x-ratelimit-limit";

/// Ingress gate bundle for RPC handlers.
#[derive(Default)]
pub struct RpcIngress {
    strategy: Option<Arc<dyn AuthStrategy>>,
    gate: Option<Arc<RateGate>>,
}

impl RpcIngress {
    /// An ingress that only correlates; gates are added with the builders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an authentication strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn AuthStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Adds the rate gate.
    pub fn with_rate_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Correlates, authenticates and rate-checks one invocation.
    pub async fn admit<T>(&self, req: &tonic::Request<T>) -> Result<RequestContext, Status> {
        let mut ctx = correlate(req);
        let payload = payload_from(req);

        if let Some(strategy) = &self.strategy {
            ctx = strategy.authenticate(ctx, &payload).await.map_err(|err| {
                warn!(peer = %payload.remote_addr, error = %err, "rpc authentication failed");
                err.to_status()
            })?;
        }

        if let Some(gate) = &self.gate {
            let identity = if ctx.principal_id().is_empty() {
                format!("ip:{}", payload.remote_addr)
            } else {
                format!("user:{}", ctx.principal_id())
            };
            match gate.admit(&identity).await {
                RateOutcome::Allow { .. } => {}
                RateOutcome::Deny { retry_after, limit } => {
                    let retry_secs = retry_after.as_secs();
                    let mut metadata = MetadataMap::new();
                    if let Ok(value) = retry_secs.to_string().parse() {
                        metadata.insert(RETRY_AFTER_KEY, value);
                    }
                    if let Ok(value) = limit.to_string().parse() {
                        metadata.insert(LIMIT_KEY, value);
                    }
                    return Err(Status::with_metadata(
                        Code::ResourceExhausted,
                        format!("rate limit exceeded, retry in {retry_secs}s"),
                        metadata,
                    ));
                }
                RateOutcome::Shed => {
                    return Err(Status::unavailable("rate limiter degraded, request shed"));
                }
            }
        }

        Ok(ctx)
    }
}

/// Builds a context with correlation ids from invocation metadata, minting
/// what the caller did not send.
pub fn correlate<T>(req: &tonic::Request<T>) -> RequestContext {
    let trace_id = metadata_value(req, "x-trace-id")
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let request_id =
        metadata_value(req, "x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string());

    RequestContext::new()
        .with_entry_point(EntryPoint::Rpc)
        .with_trace_id(trace_id)
        .with_request_id(request_id)
}

fn metadata_value<T>(req: &tonic::Request<T>, key: &str) -> Option<String> {
    req.metadata()
        .get(key)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn payload_from<T>(req: &tonic::Request<T>) -> AuthPayload {
    AuthPayload {
        headers: req.metadata().clone().into_headers(),
        remote_addr: req.remote_addr().unwrap_or(UNKNOWN_PEER),
        method: String::new(),
        path: String::new(),
    }
}

/// Tower layer installing panic recovery around the RPC stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcRecoveryLayer;

impl<S> Layer<S> for RpcRecoveryLayer {
    type Service = RpcRecovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcRecovery { inner }
    }
}

/// Service wrapper converting panics into trailers-only `INTERNAL` replies.
#[derive(Debug, Clone)]
pub struct RpcRecovery<S> {
    inner: S,
}

impl<S, B, RB> Service<http::Request<B>> for RpcRecovery<S>
where
    S: Service<http::Request<B>, Response = http::Response<RB>>,
    S::Future: Send + 'static,
    RB: Default + Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path().to_string();
        let fut = self.inner.call(req);
        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(method = %path, "rpc handler panicked");
                    Ok(panic_response())
                }
            }
        })
    }
}

/// A valid gRPC trailers-only response carrying `INTERNAL`.
fn panic_response<RB: Default>() -> http::Response<RB> {
    let mut response = http::Response::new(RB::default());
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/grpc"));
    headers.insert("grpc-status", HeaderValue::from_static("13"));
    headers.insert(
        "grpc-message",
        HeaderValue::from_static("internal server error"),
    );
    response
}
