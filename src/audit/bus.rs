//! Bus-backed audit sink.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::{AuditError, AuditEvent, AuditSink};
use crate::bus::{ProducerRecord, RecordPublisher};

/// Default topic for audit events.
pub const DEFAULT_AUDIT_TOPIC: &str = "system.audit.events";

/// Produces audit events to the message bus without ever blocking ingress.
///
/// Partitions are assigned round-robin across the configured count; payload
/// compression, batching and acks are the publisher's own configuration.
/// Publish failures are logged, not surfaced — audit-over-bus is best-effort
/// by contract; use [`AsyncAuditWriter`](super::AsyncAuditWriter) in
/// integrity mode when loss is unacceptable.
pub struct BusAuditSink<P> {
    publisher: Arc<P>,
    topic: String,
    partitions: u32,
    cursor: AtomicU32,
}

impl<P> BusAuditSink<P>
where
    P: RecordPublisher + 'static,
{
    /// Builds the sink over a publisher.
    pub fn new(publisher: Arc<P>, topic: impl Into<String>, partitions: u32) -> Self {
        let topic = topic.into();
        Self {
            publisher,
            topic: if topic.is_empty() {
                DEFAULT_AUDIT_TOPIC.to_string()
            } else {
                topic
            },
            partitions: partitions.max(1),
            cursor: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl<P> AuditSink for BusAuditSink<P>
where
    P: RecordPublisher + 'static,
{
    async fn submit(&self, event: AuditEvent) -> Result<(), AuditError> {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, action = %event.action, "audit event encoding failed");
                return Ok(());
            }
        };

        let partition = self.cursor.fetch_add(1, Ordering::Relaxed) % self.partitions;
        let record = ProducerRecord {
            topic: self.topic.clone(),
            key: None,
            payload,
            headers: vec![("x-trace-id".to_string(), event.trace_id.clone())],
            partition: Some(partition as i32),
        };

        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            if let Err(err) = publisher.publish(record).await {
                error!(error = %err, "audit event publish failed");
            }
        });

        Ok(())
    }
}
