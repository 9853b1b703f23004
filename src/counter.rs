//! Remote shared-counter client.
//!
//! Thin wrapper over a redis connection manager. Construction is fail-fast:
//! the first `PING` must succeed within a short ceiling or the process should
//! not come up at all. Every command and script execution funnels through one
//! instrumented choke point so the command stream is visible in traces.

use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use tracing::{debug, info, instrument};

use crate::error::ChassisError;
use crate::server::health::DependencyProbe;

/// Ceiling on the fail-fast connect probe.
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for the remote shared counter backing the request gates.
#[derive(Clone)]
pub struct CounterClient {
    manager: ConnectionManager,
}

impl CounterClient {
    /// Connects and verifies the counter is reachable.
    ///
    /// Returns an error when the address is malformed or the probe ping does
    /// not come back within the ceiling.
    pub async fn connect(url: &str) -> Result<Self, ChassisError> {
        let client = redis::Client::open(url).map_err(ChassisError::from)?;
        let manager = ConnectionManager::new(client).await?;

        let counter = Self { manager };
        tokio::time::timeout(CONNECT_PROBE_TIMEOUT, counter.ping())
            .await
            .map_err(|_| ChassisError::Timeout {
                duration: CONNECT_PROBE_TIMEOUT,
            })??;

        info!("counter connection established");
        Ok(counter)
    }

    /// Round-trips a `PING`.
    pub async fn ping(&self) -> Result<(), ChassisError> {
        let mut conn = self.manager.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(ChassisError::StoreUnavailable {
                service: "counter",
                retry_after: Duration::from_secs(5),
            })
        }
    }

    /// Executes a prepared server-side script.
    #[instrument(skip(self, invocation))]
    pub(crate) async fn run_script<T>(
        &self,
        op: &'static str,
        invocation: &redis::ScriptInvocation<'_>,
    ) -> Result<T, ChassisError>
    where
        T: FromRedisValue,
    {
        let mut conn = self.manager.clone();
        let started = Instant::now();
        let result: redis::RedisResult<T> = invocation.invoke_async(&mut conn).await;
        debug!(elapsed_us = started.elapsed().as_micros() as u64, "script executed");
        Ok(result?)
    }

    /// `SET key value PX ttl`.
    #[instrument(skip(self, value))]
    pub(crate) async fn set_px(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), ChassisError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// `GET key`.
    #[instrument(skip(self))]
    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, ChassisError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    /// `DEL key`.
    #[instrument(skip(self))]
    pub(crate) async fn del(&self, key: &str) -> Result<(), ChassisError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DependencyProbe for CounterClient {
    fn name(&self) -> &'static str {
        "counter"
    }

    async fn check(&self) -> Result<(), ChassisError> {
        self.ping().await
    }
}
