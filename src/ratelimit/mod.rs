//! GCRA rate gate over the remote counter with a local fallback limiter.
//!
//! The remote path shapes traffic with a single monotonic timestamp per
//! identity, executed atomically on the counter. When the counter is
//! unreachable the gate consults a process-local token bucket sized at twice
//! the configured target — a blind fail-open would turn a cache outage into
//! an origin flood, and a blind fail-closed would turn it into a full outage.

mod fallback;
mod remote;

pub use fallback::{process_fallback, FallbackLimiter};
pub use remote::RemoteGcra;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::ChassisError;

/// Static rate-limit parameters, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Sustained admissions per `period`. Zero disables the gate.
    pub rate: u32,
    /// Tolerated burst above the sustained rate. Zero means strict
    /// emission-interval pacing.
    pub burst: u32,
    /// The window `rate` is measured over.
    pub period: Duration,
}

/// Verdict from a GCRA backend for one arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcraVerdict {
    /// The arrival conforms.
    Admit,
    /// The arrival does not conform; retry after the given delay.
    Deny {
        /// Seconds until the next conforming arrival.
        retry_after: Duration,
    },
}

/// Atomic GCRA evaluation against a counter.
#[async_trait]
pub trait GcraBackend: Send + Sync {
    /// Evaluates one arrival for `key` under the given parameters.
    async fn check(
        &self,
        key: &str,
        rate: u32,
        burst: u32,
        period: Duration,
    ) -> Result<GcraVerdict, ChassisError>;
}

/// Outcome of an admission decision, including the degraded paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOutcome {
    /// Admitted.
    Allow {
        /// The advertised limit.
        limit: u32,
        /// Whether the local fallback made the call.
        fallback: bool,
    },
    /// Denied by GCRA.
    Deny {
        /// When the client may retry.
        retry_after: Duration,
        /// The advertised limit.
        limit: u32,
    },
    /// Counter unreachable and the local fallback is exhausted; shed load.
    Shed,
}

/// The rate gate.
pub struct RateGate {
    backend: Arc<dyn GcraBackend>,
    fallback: &'static FallbackLimiter,
    settings: RateLimitSettings,
}

impl RateGate {
    /// Builds the gate around a backend, registering the process-wide
    /// fallback limiter sized from the same settings.
    pub fn new(backend: Arc<dyn GcraBackend>, settings: RateLimitSettings) -> Self {
        Self::with_fallback(backend, settings, process_fallback(settings.rate, settings.burst))
    }

    /// Builds the gate with an explicitly injected fallback limiter.
    pub fn with_fallback(
        backend: Arc<dyn GcraBackend>,
        settings: RateLimitSettings,
        fallback: &'static FallbackLimiter,
    ) -> Self {
        Self { backend, fallback, settings }
    }

    /// The configured settings.
    pub fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Decides admission for one arrival of `identity`.
    ///
    /// Never returns an error: a backend failure degrades to the fallback
    /// limiter and, past that, to load shedding.
    pub async fn admit(&self, identity: &str) -> RateOutcome {
        let RateLimitSettings { rate, burst, period } = self.settings;
        if rate == 0 {
            return RateOutcome::Allow { limit: 0, fallback: false };
        }

        // A burst of zero still needs capacity for one conforming arrival
        // per emission interval.
        let burst = burst.max(1);
        let key = format!("rl:{identity}");

        match self.backend.check(&key, rate, burst, period).await {
            Ok(GcraVerdict::Admit) => RateOutcome::Allow { limit: rate, fallback: false },
            Ok(GcraVerdict::Deny { retry_after }) => {
                warn!(
                    identity = %identity,
                    retry_after_secs = retry_after.as_secs(),
                    "rate limit exceeded"
                );
                RateOutcome::Deny { retry_after, limit: rate }
            }
            Err(err) => {
                warn!(
                    identity = %identity,
                    error = %err,
                    "counter unreachable, consulting local fallback limiter"
                );
                if self.fallback.allow(identity) {
                    RateOutcome::Allow { limit: rate, fallback: true }
                } else {
                    warn!(identity = %identity, "local fallback exhausted, shedding");
                    RateOutcome::Shed
                }
            }
        }
    }
}
