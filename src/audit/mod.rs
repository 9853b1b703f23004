//! Business audit trail.
//!
//! Events are immutable once enqueued. Where they go is a sink decision:
//! the async writer drains to a line-delimited stream, the bus sink produces
//! them to the message bus, and the noop sink is for tests and development.

mod bus;
mod writer;

pub use bus::BusAuditSink;
pub use writer::AsyncAuditWriter;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audit trail configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Whether the HTTP audit middleware records anything.
    pub enabled: bool,
    /// Capacity of the async writer's buffer.
    pub buffer_size: usize,
    /// `true` selects integrity mode (suspend on a full buffer), `false`
    /// availability mode (drop and count). Availability is the default:
    /// hanging the request path because audit is slow is only acceptable
    /// for ledger-grade services.
    pub block_on_full: bool,
    /// Cap on captured request bodies.
    pub max_body_size: usize,
    /// Paths never audited.
    pub exclude_paths: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 1024,
            block_on_full: false,
            max_body_size: 32_768,
            exclude_paths: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/metrics".to_string(),
            ],
        }
    }
}

/// One recorded business event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Who acted.
    pub actor_id: String,
    /// What they did.
    pub action: String,
    /// What they did it to.
    pub resource: String,
    /// Prior state, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    /// Resulting state, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the causing request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    /// Free-form string attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// A new event stamped now.
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            resource: resource.into(),
            old_value: None,
            new_value: None,
            timestamp: Utc::now(),
            trace_id: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the correlation id.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Sets the resulting state.
    pub fn with_new_value(mut self, value: serde_json::Value) -> Self {
        self.new_value = Some(value);
        self
    }

    /// Sets the prior state.
    pub fn with_old_value(mut self, value: serde_json::Value) -> Self {
        self.old_value = Some(value);
        self
    }

    /// Adds one metadata attribute.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Why an event was not accepted.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Availability mode and the buffer was full.
    #[error("audit buffer full, event dropped")]
    BufferFull,
    /// Integrity mode and the caller's scope was cancelled while waiting.
    #[error("caller cancelled while audit buffer was full")]
    Cancelled,
    /// The writer has been closed.
    #[error("audit writer closed")]
    Closed,
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Accepts one event for recording.
    async fn submit(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Discards everything; for tests and development.
pub struct NoopSink;

#[async_trait]
impl AuditSink for NoopSink {
    async fn submit(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}
