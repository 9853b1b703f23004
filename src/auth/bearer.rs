//! Bearer-token strategy backed by the JWKS verifier.

use async_trait::async_trait;
use tracing::warn;

use super::{AuthPayload, AuthStrategy};
use crate::context::RequestContext;
use crate::error::ChassisError;
use crate::jwks::JwksVerifier;

/// Authenticates `Authorization: Bearer <token>` against the verifier and
/// hydrates the context with the verified identity.
pub struct BearerStrategy {
    verifier: JwksVerifier,
}

impl BearerStrategy {
    /// Creates the strategy around a shared verifier.
    pub fn new(verifier: JwksVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl AuthStrategy for BearerStrategy {
    async fn authenticate(
        &self,
        ctx: RequestContext,
        payload: &AuthPayload,
    ) -> Result<RequestContext, ChassisError> {
        let header = payload
            .header("authorization")
            .ok_or(ChassisError::TokenMissing)?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChassisError::TokenMalformed {
                reason: "authorization header is not a bearer credential".to_string(),
            })?;

        let claims = self.verifier.verify(token).await.map_err(|err| {
            warn!(
                error = %err,
                peer = %payload.remote_addr,
                "token verification failed"
            );
            err
        })?;

        let mut ctx = ctx
            .with_identity(
                claims.sub.clone(),
                claims.org().to_string(),
                claims.email.clone(),
                claims.actor(),
                claims.roles.clone(),
            )
            .with_auth_method("jwt");
        if !claims.session().is_empty() {
            ctx = ctx.with_session_id(claims.session().to_string());
        }
        Ok(ctx)
    }
}
