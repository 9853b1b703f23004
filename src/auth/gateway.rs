//! Trusted-gateway strategy: identity headers behind a CIDR perimeter.

use async_trait::async_trait;
use ipnet::IpNet;
use tracing::warn;

use super::{AuthPayload, AuthStrategy};
use crate::context::{ActorType, RequestContext};
use crate::error::ChassisError;

/// Configurable identity header names for the gateway strategy.
#[derive(Debug, Clone)]
pub struct GatewayHeaders {
    /// Header carrying the principal id. Mandatory on requests.
    pub user_id: String,
    /// Header carrying comma-separated roles.
    pub roles: String,
    /// Header carrying the principal email.
    pub email: String,
    /// Header carrying the tenant id.
    pub org_id: String,
}

impl Default for GatewayHeaders {
    fn default() -> Self {
        Self {
            user_id: "x-gateway-user-id".to_string(),
            roles: "x-gateway-roles".to_string(),
            email: "x-gateway-email".to_string(),
            org_id: "x-gateway-org-id".to_string(),
        }
    }
}

/// Trusts identity headers only from peers inside a configured perimeter.
///
/// Any peer outside the perimeter is rejected before a single header is
/// read; header spoofing from the open network is therefore impossible no
/// matter what the request carries.
pub struct TrustedGatewayStrategy {
    trusted: Vec<IpNet>,
    headers: GatewayHeaders,
}

impl TrustedGatewayStrategy {
    /// Builds the strategy from CIDR strings.
    ///
    /// An empty list is refused: a gateway strategy with no perimeter would
    /// trust the whole internet. Single addresses are accepted and widened
    /// to host networks.
    pub fn new(cidrs: &[String], headers: GatewayHeaders) -> Result<Self, ChassisError> {
        if cidrs.is_empty() {
            return Err(ChassisError::InvalidInput {
                reason: "trusted proxy list cannot be empty in gateway mode".to_string(),
            });
        }

        let mut trusted = Vec::with_capacity(cidrs.len());
        for raw in cidrs {
            let net = raw.parse::<IpNet>().or_else(|_| {
                raw.parse::<std::net::IpAddr>()
                    .map(IpNet::from)
                    .map_err(|_| ChassisError::InvalidInput {
                        reason: format!("invalid trusted CIDR: {raw}"),
                    })
            })?;
            trusted.push(net);
        }

        Ok(Self { trusted, headers })
    }
}

#[async_trait]
impl AuthStrategy for TrustedGatewayStrategy {
    async fn authenticate(
        &self,
        ctx: RequestContext,
        payload: &AuthPayload,
    ) -> Result<RequestContext, ChassisError> {
        let peer = payload.peer_ip();
        if !self.trusted.iter().any(|net| net.contains(&peer)) {
            warn!(
                peer = %peer,
                path = %payload.path,
                "untrusted peer attempted to present gateway identity headers"
            );
            return Err(ChassisError::UntrustedPeer {
                peer: peer.to_string(),
            });
        }

        let user_id = payload
            .header(&self.headers.user_id)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ChassisError::MissingIdentityHeader {
                header: self.headers.user_id.clone(),
            })?
            .to_string();

        let roles: Vec<String> = payload
            .header(&self.headers.roles)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|role| !role.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let org_id = payload.header(&self.headers.org_id).unwrap_or("").to_string();
        let email = payload.header(&self.headers.email).unwrap_or("").to_string();

        Ok(ctx
            .with_identity(user_id, org_id, email, ActorType::Human, roles)
            .with_auth_method("gateway"))
    }
}
