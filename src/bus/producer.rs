//! Synchronous-by-contract producer with trace propagation.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use super::{BusError, ProducerRecord, RecordAck, RecordPublisher};
use crate::context::RequestContext;

/// Header carrying the trace id across the bus.
pub(crate) const TRACE_HEADER: &str = "x-trace-id";
/// Header carrying the request id across the bus.
pub(crate) const REQUEST_HEADER: &str = "x-request-id";

/// Producer harness: serializes payloads, injects trace context, and blocks
/// until the broker acknowledges durability.
///
/// This is the only publishing mode suitable for a transactional outbox —
/// a fire-and-forget publish could ack the caller while the record is lost.
pub struct Producer<P> {
    publisher: Arc<P>,
}

impl<P> Producer<P>
where
    P: RecordPublisher,
{
    /// Wraps a broker publisher.
    pub fn new(publisher: Arc<P>) -> Self {
        Self { publisher }
    }

    /// Publishes `payload` as JSON to `topic`, keyed by `key`.
    pub async fn publish<T>(
        &self,
        ctx: &RequestContext,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<RecordAck, BusError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(payload)?;

        let mut headers = Vec::with_capacity(2);
        headers.push((TRACE_HEADER.to_string(), ctx.trace_id().to_string()));
        if !ctx.request_id().is_empty() {
            headers.push((REQUEST_HEADER.to_string(), ctx.request_id().to_string()));
        }

        let record = ProducerRecord {
            topic: topic.to_string(),
            key: Some(key.to_string()),
            payload: bytes,
            headers,
            partition: None,
        };

        match self.publisher.publish(record).await {
            Ok(ack) => {
                debug!(
                    topic = topic,
                    partition = ack.partition,
                    offset = ack.offset,
                    "record published"
                );
                Ok(ack)
            }
            Err(err) => {
                error!(topic = topic, error = %err, "publish failed");
                Err(err)
            }
        }
    }
}
