//! Token claims accepted by the verifier.

use serde::{Deserialize, Serialize};

use crate::context::ActorType;

/// Registered claims plus the platform extensions.
///
/// `exp` and `iss` are enforced by the verifier; everything else is optional
/// and read through the defaulting accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer.
    pub iss: String,
    /// Subject (principal id).
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Not-before, seconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued-at, seconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Token id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Principal email.
    #[serde(default)]
    pub email: String,
    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// OAuth-style scope string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Tenant the principal belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Actor classification; absent means human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_type: Option<String>,
    /// Login session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

impl Claims {
    /// Actor classification, defaulting to human when the issuer omitted it.
    pub fn actor(&self) -> ActorType {
        self.actor_type
            .as_deref()
            .map(ActorType::parse_or_default)
            .unwrap_or(ActorType::Human)
    }

    /// Tenant id or empty.
    pub fn org(&self) -> &str {
        self.org_id.as_deref().unwrap_or("")
    }

    /// Session id or empty.
    pub fn session(&self) -> &str {
        self.sid.as_deref().unwrap_or("")
    }
}
