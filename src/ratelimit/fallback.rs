//! Process-local fallback limiter for counter outages.

use std::num::NonZeroU32;
use std::sync::OnceLock;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// In-process token bucket, keyed by identity.
///
/// Sized at twice the remote target (rate `2R`, capacity `2B`): generous
/// enough that a short counter blip is invisible to clients, tight enough
/// that a long outage cannot become an origin flood.
pub struct FallbackLimiter {
    limiter: KeyedLimiter,
}

impl FallbackLimiter {
    /// Builds a limiter from the remote targets.
    pub fn new(rate_target: u32, burst_target: u32) -> Self {
        let rate = NonZeroU32::new(rate_target.saturating_mul(2)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_target.saturating_mul(2)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)),
        }
    }

    /// Whether `identity` may pass right now.
    pub fn allow(&self, identity: &str) -> bool {
        self.limiter.check_key(&identity.to_string()).is_ok()
    }
}

static PROCESS_FALLBACK: OnceLock<FallbackLimiter> = OnceLock::new();

/// The process-wide fallback limiter.
///
/// Constructed exactly once; later calls return the existing handle and
/// ignore their arguments. Callers obtain the handle at init and inject it,
/// rather than reaching for this function on the request path.
pub fn process_fallback(rate_target: u32, burst_target: u32) -> &'static FallbackLimiter {
    PROCESS_FALLBACK.get_or_init(|| FallbackLimiter::new(rate_target, burst_target))
}
