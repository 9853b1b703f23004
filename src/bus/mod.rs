//! Message-bus adapter: producer and consumer harnesses over the broker
//! client contract.
//!
//! The broker client library itself is an external collaborator; this module
//! defines the record shapes and the [`RecordPublisher`]/[`RecordStream`]
//! seams a binding implements, plus the delivery semantics layered on top:
//! acknowledged publication with trace propagation on the way out, and
//! per-record commits with retry, backoff and dead-lettering on the way in.

mod consumer;
mod producer;

pub use consumer::{Consumer, ConsumerConfig, ConsumerManager, DlqPolicy, RecordHandler};
pub use producer::Producer;

use async_trait::async_trait;
use thiserror::Error;

/// Broker bootstrap configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bootstrap broker addresses.
    pub brokers: Vec<String>,
}

/// A record to publish.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    /// Destination topic.
    pub topic: String,
    /// Partitioning key.
    pub key: Option<String>,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// String headers, trace context included.
    pub headers: Vec<(String, String)>,
    /// Explicit partition, or `None` for the client's partitioner.
    pub partition: Option<i32>,
}

/// A record delivered to a consumer.
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partitioning key.
    pub key: Option<Vec<u8>>,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// String headers.
    pub headers: Vec<(String, String)>,
}

impl ConsumerRecord {
    /// First value of header `name`, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Broker acknowledgement for a published record.
#[derive(Debug, Clone, Copy)]
pub struct RecordAck {
    /// Partition the record landed on.
    pub partition: i32,
    /// Offset assigned by the broker.
    pub offset: i64,
}

/// Bus adapter failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker rejected or never acknowledged a publish.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Client-reported reason.
        reason: String,
    },
    /// Polling the subscription failed.
    #[error("consume failed: {reason}")]
    Consume {
        /// Client-reported reason.
        reason: String,
    },
    /// Committing an offset failed.
    #[error("commit failed: {reason}")]
    Commit {
        /// Client-reported reason.
        reason: String,
    },
    /// Payload could not be serialized.
    #[error("payload serialization failed")]
    Serialization(#[from] serde_json::Error),
}

/// Publishing side of the broker client contract.
///
/// `publish` must not resolve until the broker has acknowledged durability;
/// that property is what makes the producer usable for the transactional
/// outbox pattern.
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    /// Publishes one record and awaits the broker acknowledgement.
    async fn publish(&self, record: ProducerRecord) -> Result<RecordAck, BusError>;
}

/// Consuming side of the broker client contract, one subscription per value.
///
/// Offsets advance only through `commit`; the harness calls it per record,
/// after the handler has succeeded, which yields at-least-once delivery with
/// per-partition ordering.
#[async_trait]
pub trait RecordStream: Send {
    /// Waits for the next record; `None` means the subscription ended.
    async fn next_record(&mut self) -> Result<Option<ConsumerRecord>, BusError>;

    /// Commits the offset of a processed record.
    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BusError>;
}
