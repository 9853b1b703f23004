//! Idempotency gate: atomic claim, conflict detection, response replay.
//!
//! A client-supplied key scopes at-most-one-effect semantics for unsafe
//! requests. The first claimant processes and captures its response; byte
//! identical retries replay the capture, concurrent duplicates are told to
//! back off, and key reuse with a different payload is reported as a client
//! bug. A store outage fails closed — silently bypassing the gate would
//! break its only guarantee.

mod fingerprint;
mod store;

pub use fingerprint::{payload_fingerprint, EMPTY_BODY_FINGERPRINT};
pub use store::RedisClaimStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ChassisError;

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Header carrying the client key.
    pub header: String,
    /// Lease on a PROCESSING claim; bounds recovery after a crashed holder.
    pub processing_ttl: Duration,
    /// Replay window for COMPLETED records.
    pub replay_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            header: "X-Idempotency-Key".to_string(),
            processing_ttl: Duration::from_secs(30),
            replay_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Lifecycle state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// The first claimant is still processing.
    #[serde(rename = "PROCESSING")]
    Processing,
    /// A terminal response has been captured.
    #[serde(rename = "COMPLETED")]
    Completed,
}

/// The stored compound value for one `(owner, key)` pair.
///
/// A record is never simultaneously processing and completed; the only
/// transitions are PROCESSING → COMPLETED and PROCESSING → deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Lifecycle state.
    pub status: RecordStatus,
    /// Fingerprint of the claiming payload.
    pub fingerprint: String,
    /// Captured status code, present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Captured content type, present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Captured body, base64, present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl IdempotencyRecord {
    /// A fresh PROCESSING claim.
    pub fn processing(fingerprint: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Processing,
            fingerprint: fingerprint.into(),
            status_code: None,
            content_type: None,
            body: None,
        }
    }

    /// A COMPLETED record capturing a terminal response.
    pub fn completed(
        fingerprint: impl Into<String>,
        status_code: u16,
        content_type: Option<String>,
        body: &[u8],
    ) -> Self {
        Self {
            status: RecordStatus::Completed,
            fingerprint: fingerprint.into(),
            status_code: Some(status_code),
            content_type,
            body: Some(BASE64.encode(body)),
        }
    }

    /// Decodes the captured body.
    pub fn body_bytes(&self) -> Vec<u8> {
        self.body
            .as_deref()
            .and_then(|encoded| BASE64.decode(encoded).ok())
            .unwrap_or_default()
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the key; process and capture.
    Claimed,
    /// Another caller is still processing the key.
    InProgress,
    /// A completed record with the same fingerprint exists; replay it.
    FingerprintMatch,
    /// A completed record with a different fingerprint exists.
    FingerprintConflict,
}

/// Storage contract for the gate.
///
/// `claim` must be atomic: of any number of concurrent claimants for an
/// absent key, exactly one observes [`ClaimOutcome::Claimed`].
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically claims `key` for a payload with `fingerprint`.
    async fn claim(
        &self,
        key: &str,
        fingerprint: &str,
        processing_ttl: Duration,
    ) -> Result<ClaimOutcome, ChassisError>;

    /// Replaces the PROCESSING claim with a completed record.
    async fn complete(
        &self,
        key: &str,
        record: &IdempotencyRecord,
        replay_ttl: Duration,
    ) -> Result<(), ChassisError>;

    /// Deletes the claim so the client may retry.
    async fn release(&self, key: &str) -> Result<(), ChassisError>;

    /// Loads the stored record, if any.
    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>, ChassisError>;
}

/// The idempotency gate.
pub struct IdempotencyGate {
    store: Arc<dyn ClaimStore>,
    config: IdempotencyConfig,
}

impl IdempotencyGate {
    /// Builds the gate over a claim store.
    pub fn new(store: Arc<dyn ClaimStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    /// The configured key header name.
    pub fn header(&self) -> &str {
        &self.config.header
    }

    /// Storage key for one `(owner, client key)` pair.
    ///
    /// The owner is the authenticated principal or the anonymous client IP;
    /// scoping by owner prevents cross-tenant key collisions.
    pub fn storage_key(&self, owner: &str, client_key: &str) -> String {
        format!("idempotency:v1:{owner}:{client_key}")
    }

    /// Atomically claims a key.
    pub async fn claim(
        &self,
        storage_key: &str,
        fingerprint: &str,
    ) -> Result<ClaimOutcome, ChassisError> {
        self.store
            .claim(storage_key, fingerprint, self.config.processing_ttl)
            .await
    }

    /// Captures a terminal response for replay.
    pub async fn complete(
        &self,
        storage_key: &str,
        record: &IdempotencyRecord,
    ) -> Result<(), ChassisError> {
        self.store
            .complete(storage_key, record, self.config.replay_ttl)
            .await
    }

    /// Releases a claim after a non-terminal outcome.
    pub async fn release(&self, storage_key: &str) {
        if let Err(err) = self.store.release(storage_key).await {
            warn!(key = %storage_key, error = %err, "failed to release idempotency claim; lease will expire");
        }
    }

    /// Loads the completed record for replay.
    pub async fn load(
        &self,
        storage_key: &str,
    ) -> Result<Option<IdempotencyRecord>, ChassisError> {
        self.store.load(storage_key).await
    }
}
