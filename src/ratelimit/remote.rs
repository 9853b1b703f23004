//! Counter-backed GCRA, executed as one atomic server-side script.

use std::time::Duration;

use async_trait::async_trait;

use super::{GcraBackend, GcraVerdict};
use crate::counter::CounterClient;
use crate::error::ChassisError;

/// Generic Cell Rate Algorithm over a single stored timestamp per key.
///
/// Time is read from the counter's own clock, so every replica shapes
/// against the same timeline. State expires after two idle periods.
const GCRA_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local period = tonumber(ARGV[2])
local burst = tonumber(ARGV[3])

local emission_interval = period / rate
local now = redis.call('TIME')
local now_ts = tonumber(now[1]) + (tonumber(now[2]) / 1000000)

local tat = redis.call('GET', key)
if not tat then
    tat = now_ts
else
    tat = tonumber(tat)
end
tat = math.max(now_ts, tat)

local new_tat = tat + emission_interval
local allow_at = new_tat - (burst * emission_interval)

if allow_at <= now_ts then
    redis.call('SET', key, new_tat, 'EX', math.ceil(period * 2))
    return -1
end

return math.ceil(allow_at - now_ts)
"#;

/// [`GcraBackend`] executing the GCRA script on the remote counter.
pub struct RemoteGcra {
    counter: CounterClient,
    script: redis::Script,
}

impl RemoteGcra {
    /// Wraps a connected counter client.
    pub fn new(counter: CounterClient) -> Self {
        Self {
            counter,
            script: redis::Script::new(GCRA_SCRIPT),
        }
    }
}

#[async_trait]
impl GcraBackend for RemoteGcra {
    async fn check(
        &self,
        key: &str,
        rate: u32,
        burst: u32,
        period: Duration,
    ) -> Result<GcraVerdict, ChassisError> {
        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(key)
            .arg(rate)
            .arg(period.as_secs_f64())
            .arg(burst);

        let verdict: i64 = self.counter.run_script("gcra", &invocation).await?;
        if verdict < 0 {
            Ok(GcraVerdict::Admit)
        } else {
            Ok(GcraVerdict::Deny {
                retry_after: Duration::from_secs(verdict as u64),
            })
        }
    }
}
