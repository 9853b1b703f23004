//! Token verification against a cached JSON Web Key Set.

mod claims;
mod verifier;

pub use claims::Claims;
pub use verifier::JwksVerifier;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tracing::warn;

use crate::error::ChassisError;

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct JwksConfig {
    /// Endpoint publishing the key set.
    pub url: String,
    /// Issuer every accepted token must carry.
    pub issuer: String,
    /// Background refresh cadence.
    pub refresh_interval: Duration,
    /// Age ceiling after which a refresh is forced on the verification path.
    pub max_stale: Duration,
}

/// One key of a published key set.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type; only `RSA` is accepted.
    pub kty: String,
    /// Key use; only `sig` is accepted.
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    /// Key id, required non-empty.
    #[serde(default)]
    pub kid: String,
    /// RSA modulus, base64url.
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent, base64url.
    #[serde(default)]
    pub e: Option<String>,
}

/// The JWKS endpoint response shape.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    /// Published keys.
    pub keys: Vec<Jwk>,
}

/// Immutable snapshot of the usable signing keys.
///
/// Replaced wholesale on refresh; readers observe either the previous or the
/// new snapshot, never a partial one.
pub(crate) struct KeySet {
    pub(crate) keys: HashMap<String, DecodingKey>,
    pub(crate) fetched_at: Instant,
}

impl KeySet {
    /// Builds a snapshot from a published document, keeping only usable
    /// RSA signature keys.
    ///
    /// A document with zero usable keys is an error: swallowing it would let
    /// a broken publisher empty the cache.
    pub(crate) fn from_document(document: JwksDocument) -> Result<Self, ChassisError> {
        let mut keys = HashMap::new();
        for jwk in document.keys {
            if jwk.kty != "RSA" || jwk.key_use.as_deref() != Some("sig") || jwk.kid.is_empty() {
                continue;
            }
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                warn!(kid = %jwk.kid, "key missing RSA components, skipping");
                continue;
            };
            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(err) => {
                    warn!(kid = %jwk.kid, error = %err, "unusable key in document, skipping");
                }
            }
        }

        if keys.is_empty() {
            return Err(ChassisError::KeySetUnavailable {
                reason: "document contains zero usable RSA signature keys".to_string(),
            });
        }

        Ok(Self {
            keys,
            fetched_at: Instant::now(),
        })
    }

    pub(crate) fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}
