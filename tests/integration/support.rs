//! In-memory doubles reproducing the remote-side semantics.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chassis::bus::{
    BusError, ConsumerRecord, ProducerRecord, RecordAck, RecordPublisher, RecordStream,
};
use chassis::error::ChassisError;
use chassis::idempotency::{ClaimOutcome, ClaimStore, IdempotencyRecord, RecordStatus};
use chassis::ratelimit::{GcraBackend, GcraVerdict};

/// Installs a per-test-writer subscriber once so failing runs show what the
/// gates logged. `RUST_LOG` narrows the output the usual way.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// GCRA over an in-process map with a manually advanced clock.
pub struct InMemoryGcra {
    clock: Mutex<f64>,
    tat: Mutex<HashMap<String, f64>>,
}

impl InMemoryGcra {
    pub fn new() -> Self {
        Self {
            clock: Mutex::new(0.0),
            tat: Mutex::new(HashMap::new()),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.clock.lock().unwrap() += seconds;
    }
}

#[async_trait]
impl GcraBackend for InMemoryGcra {
    async fn check(
        &self,
        key: &str,
        rate: u32,
        burst: u32,
        period: Duration,
    ) -> Result<GcraVerdict, ChassisError> {
        let now = *self.clock.lock().unwrap();
        let mut tats = self.tat.lock().unwrap();

        let emission_interval = period.as_secs_f64() / f64::from(rate);
        let tat = tats.get(key).copied().unwrap_or(now).max(now);
        let new_tat = tat + emission_interval;
        let allow_at = new_tat - f64::from(burst) * emission_interval;

        if allow_at <= now {
            tats.insert(key.to_string(), new_tat);
            Ok(GcraVerdict::Admit)
        } else {
            Ok(GcraVerdict::Deny {
                retry_after: Duration::from_secs((allow_at - now).ceil() as u64),
            })
        }
    }
}

/// Backend simulating a counter outage.
pub struct UnreachableGcra;

#[async_trait]
impl GcraBackend for UnreachableGcra {
    async fn check(
        &self,
        _key: &str,
        _rate: u32,
        _burst: u32,
        _period: Duration,
    ) -> Result<GcraVerdict, ChassisError> {
        Err(ChassisError::StoreUnavailable {
            service: "counter",
            retry_after: Duration::from_secs(5),
        })
    }
}

/// Claim store over a mutex-guarded map; the lock provides the atomicity the
/// server-side script provides in production.
pub struct InMemoryClaimStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: &str, record: IdempotencyRecord) {
        self.records.lock().unwrap().insert(key.to_string(), record);
    }

    pub fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn claim(
        &self,
        key: &str,
        fingerprint: &str,
        _processing_ttl: Duration,
    ) -> Result<ClaimOutcome, ChassisError> {
        let mut records = self.records.lock().unwrap();
        match records.get(key) {
            None => {
                records.insert(key.to_string(), IdempotencyRecord::processing(fingerprint));
                Ok(ClaimOutcome::Claimed)
            }
            Some(record) if record.status == RecordStatus::Processing => {
                Ok(ClaimOutcome::InProgress)
            }
            Some(record) if record.fingerprint == fingerprint => {
                Ok(ClaimOutcome::FingerprintMatch)
            }
            Some(_) => Ok(ClaimOutcome::FingerprintConflict),
        }
    }

    async fn complete(
        &self,
        key: &str,
        record: &IdempotencyRecord,
        _replay_ttl: Duration,
    ) -> Result<(), ChassisError> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), ChassisError> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>, ChassisError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }
}

/// Claim store simulating a store outage.
pub struct UnreachableClaimStore;

#[async_trait]
impl ClaimStore for UnreachableClaimStore {
    async fn claim(
        &self,
        _key: &str,
        _fingerprint: &str,
        _processing_ttl: Duration,
    ) -> Result<ClaimOutcome, ChassisError> {
        Err(unavailable())
    }

    async fn complete(
        &self,
        _key: &str,
        _record: &IdempotencyRecord,
        _replay_ttl: Duration,
    ) -> Result<(), ChassisError> {
        Err(unavailable())
    }

    async fn release(&self, _key: &str) -> Result<(), ChassisError> {
        Err(unavailable())
    }

    async fn load(&self, _key: &str) -> Result<Option<IdempotencyRecord>, ChassisError> {
        Err(unavailable())
    }
}

fn unavailable() -> ChassisError {
    ChassisError::StoreUnavailable {
        service: "counter",
        retry_after: Duration::from_secs(5),
    }
}

/// Publisher collecting records, optionally failing.
pub struct MemoryPublisher {
    pub records: Mutex<Vec<ProducerRecord>>,
    pub fail: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RecordPublisher for MemoryPublisher {
    async fn publish(&self, record: ProducerRecord) -> Result<RecordAck, BusError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                topic: record.topic,
                reason: "broker unreachable".to_string(),
            });
        }
        let mut records = self.records.lock().unwrap();
        let offset = records.len() as i64;
        records.push(record);
        Ok(RecordAck { partition: 0, offset })
    }
}

/// Subscription over a fixed set of records; ends when drained.
pub struct MemoryStream {
    pending: VecDeque<ConsumerRecord>,
    pub committed: Arc<Mutex<Vec<i64>>>,
}

impl MemoryStream {
    pub fn new(records: Vec<ConsumerRecord>) -> Self {
        Self {
            pending: records.into(),
            committed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl RecordStream for MemoryStream {
    async fn next_record(&mut self) -> Result<Option<ConsumerRecord>, BusError> {
        Ok(self.pending.pop_front())
    }

    async fn commit(&mut self, record: &ConsumerRecord) -> Result<(), BusError> {
        self.committed.lock().unwrap().push(record.offset);
        Ok(())
    }
}

/// A consumer record for tests.
pub fn record(topic: &str, offset: i64, payload: &[u8]) -> ConsumerRecord {
    ConsumerRecord {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: Some(b"key".to_vec()),
        payload: payload.to_vec(),
        headers: vec![("x-trace-id".to_string(), "trace-bus".to_string())],
    }
}
