//! Counter-backed claim store.

use std::time::Duration;

use async_trait::async_trait;

use super::{ClaimOutcome, ClaimStore, IdempotencyRecord};
use crate::counter::CounterClient;
use crate::error::ChassisError;

/// Atomic claim: write-if-absent with a lease, otherwise discriminate
/// in-flight from completed and compare fingerprints.
const CLAIM_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', tonumber(ARGV[2]))
    return 'CLAIMED'
end
local record = cjson.decode(current)
if record.status == 'PROCESSING' then
    return 'IN_PROGRESS'
end
if record.fingerprint == ARGV[3] then
    return 'MATCH'
end
return 'CONFLICT'
"#;

/// [`ClaimStore`] running the claim protocol on the remote counter.
pub struct RedisClaimStore {
    counter: CounterClient,
    claim_script: redis::Script,
}

impl RedisClaimStore {
    /// Wraps a connected counter client.
    pub fn new(counter: CounterClient) -> Self {
        Self {
            counter,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
        }
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn claim(
        &self,
        key: &str,
        fingerprint: &str,
        processing_ttl: Duration,
    ) -> Result<ClaimOutcome, ChassisError> {
        let record = serde_json::to_string(&IdempotencyRecord::processing(fingerprint))?;

        let mut invocation = self.claim_script.prepare_invoke();
        invocation
            .key(key)
            .arg(record)
            .arg(processing_ttl.as_millis() as u64)
            .arg(fingerprint);

        let reply: String = self.counter.run_script("idempotency_claim", &invocation).await?;
        match reply.as_str() {
            "CLAIMED" => Ok(ClaimOutcome::Claimed),
            "IN_PROGRESS" => Ok(ClaimOutcome::InProgress),
            "MATCH" => Ok(ClaimOutcome::FingerprintMatch),
            "CONFLICT" => Ok(ClaimOutcome::FingerprintConflict),
            other => Err(ChassisError::Internal(anyhow::anyhow!(
                "unexpected claim script reply: {other}"
            ))),
        }
    }

    async fn complete(
        &self,
        key: &str,
        record: &IdempotencyRecord,
        replay_ttl: Duration,
    ) -> Result<(), ChassisError> {
        let value = serde_json::to_string(record)?;
        self.counter.set_px(key, &value, replay_ttl).await
    }

    async fn release(&self, key: &str) -> Result<(), ChassisError> {
        self.counter.del(key).await
    }

    async fn load(&self, key: &str) -> Result<Option<IdempotencyRecord>, ChassisError> {
        match self.counter.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
