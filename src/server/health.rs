//! Liveness and readiness probes.
//!
//! Liveness is constant: the binary answering is the signal. Readiness
//! serves a cached snapshot maintained by a background poller, so a probe
//! storm never amplifies into a dependency storm.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ChassisError;

/// Hard ceiling on a single dependency check.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A dependency whose health gates readiness.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Stable name reported in the readiness body.
    fn name(&self) -> &'static str;

    /// Checks the dependency; an error marks it down.
    async fn check(&self) -> Result<(), ChassisError>;
}

/// Cached readiness state.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessSnapshot {
    /// Whether every dependency was up at the last poll.
    pub ready: bool,
    /// Per-dependency status, `"up"` or `"down"`.
    pub dependencies: BTreeMap<String, String>,
}

/// Shared holder for the latest snapshot.
pub struct HealthState {
    snapshot: ArcSwap<ReadinessSnapshot>,
}

impl HealthState {
    /// Starts not-ready until the first poll lands.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(ReadinessSnapshot {
                ready: false,
                dependencies: BTreeMap::new(),
            }),
        })
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<ReadinessSnapshot> {
        self.snapshot.load_full()
    }
}

/// Background poller refreshing the cached readiness state.
pub struct HealthPoller {
    probes: Vec<Arc<dyn DependencyProbe>>,
    state: Arc<HealthState>,
    interval: Duration,
}

impl HealthPoller {
    /// Builds a poller over the registered probes.
    pub fn new(
        probes: Vec<Arc<dyn DependencyProbe>>,
        state: Arc<HealthState>,
        interval: Duration,
    ) -> Self {
        Self { probes, state, interval }
    }

    /// Spawns the poll loop; the first cycle runs immediately.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("health poller stopping");
                        return;
                    }
                    _ = ticker.tick() => self.poll_once().await,
                }
            }
        })
    }

    async fn poll_once(&self) {
        let mut dependencies = BTreeMap::new();
        let mut ready = true;

        for probe in &self.probes {
            let healthy = match tokio::time::timeout(PROBE_TIMEOUT, probe.check()).await {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    error!(dependency = probe.name(), error = %err, "dependency check failed");
                    false
                }
                Err(_) => {
                    error!(dependency = probe.name(), "dependency check timed out");
                    false
                }
            };
            ready &= healthy;
            dependencies.insert(
                probe.name().to_string(),
                if healthy { "up" } else { "down" }.to_string(),
            );
        }

        self.state
            .snapshot
            .store(Arc::new(ReadinessSnapshot { ready, dependencies }));
    }
}

/// Routes `/health` (liveness) and `/ready` (cached readiness).
pub fn routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(readiness))
        .with_state(state)
}

async fn readiness(State(state): State<Arc<HealthState>>) -> Response {
    let snapshot = state.snapshot();
    let status = if snapshot.ready {
        http::StatusCode::OK
    } else {
        http::StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if snapshot.ready { "UP" } else { "DOWN" },
        "dependencies": snapshot.dependencies,
    });
    (status, axum::Json(body)).into_response()
}
