//! Rate gate decision paths: disabled, deny, degraded.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chassis::error::ChassisError;
use chassis::ratelimit::{
    FallbackLimiter, GcraBackend, GcraVerdict, RateGate, RateLimitSettings, RateOutcome,
};

struct ScriptedBackend {
    verdict: GcraVerdict,
    calls: AtomicU32,
    last_args: Mutex<Option<(String, u32, u32)>>,
}

impl ScriptedBackend {
    fn admitting() -> Self {
        Self {
            verdict: GcraVerdict::Admit,
            calls: AtomicU32::new(0),
            last_args: Mutex::new(None),
        }
    }

    fn denying(retry_after: Duration) -> Self {
        Self {
            verdict: GcraVerdict::Deny { retry_after },
            calls: AtomicU32::new(0),
            last_args: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GcraBackend for ScriptedBackend {
    async fn check(
        &self,
        key: &str,
        rate: u32,
        burst: u32,
        _period: Duration,
    ) -> Result<GcraVerdict, ChassisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = Some((key.to_string(), rate, burst));
        Ok(self.verdict)
    }
}

struct UnreachableBackend;

#[async_trait]
impl GcraBackend for UnreachableBackend {
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

fn settings(rate: u32, burst: u32) -> RateLimitSettings {
    RateLimitSettings {
        rate,
        burst,
        period: Duration::from_secs(1),
    }
}

fn leaked_fallback(rate: u32, burst: u32) -> &'static FallbackLimiter {
    Box::leak(Box::new(FallbackLimiter::new(rate, burst)))
}

#[tokio::test]
async fn zero_rate_admits_without_consulting_the_backend() {
    let backend = Arc::new(ScriptedBackend::admitting());
    let gate = RateGate::with_fallback(backend.clone(), settings(0, 10), leaked_fallback(0, 10));

    for _ in 0..50 {
        assert!(matches!(
            gate.admit("user:alice").await,
            RateOutcome::Allow { fallback: false, .. }
        ));
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn keys_are_prefixed_and_zero_burst_is_clamped() {
    let backend = Arc::new(ScriptedBackend::admitting());
    let gate = RateGate::with_fallback(backend.clone(), settings(10, 0), leaked_fallback(10, 0));

    gate.admit("user:alice").await;

    let (key, rate, burst) = backend.last_args.lock().unwrap().clone().unwrap();
    assert_eq!(key, "rl:user:alice");
    assert_eq!(rate, 10);
    assert_eq!(burst, 1);
}

#[tokio::test]
async fn deny_carries_the_retry_hint_and_limit() {
    let backend = Arc::new(ScriptedBackend::denying(Duration::from_secs(2)));
    let gate = RateGate::with_fallback(backend, settings(10, 10), leaked_fallback(10, 10));

    match gate.admit("user:alice").await {
        RateOutcome::Deny { retry_after, limit } => {
            assert_eq!(retry_after, Duration::from_secs(2));
            assert_eq!(limit, 10);
        }
        other => panic!("expected deny, got {other:?}"),
    }
}

#[tokio::test]
async fn counter_outage_degrades_to_fallback_then_sheds() {
    let gate = RateGate::with_fallback(
        Arc::new(UnreachableBackend),
        settings(10, 10),
        leaked_fallback(10, 10),
    );

    let mut fallback_admits = 0;
    loop {
        match gate.admit("user:alice").await {
            RateOutcome::Allow { fallback: true, .. } => fallback_admits += 1,
            RateOutcome::Shed => break,
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(fallback_admits <= 30, "fallback never exhausted");
    }

    // Twice the configured burst, give or take refill during the loop.
    assert!((20..=22).contains(&fallback_admits), "admitted {fallback_admits}");
}

#[tokio::test]
async fn fallback_outage_is_per_identity() {
    let fallback = leaked_fallback(1, 1);
    let gate = RateGate::with_fallback(Arc::new(UnreachableBackend), settings(1, 1), fallback);

    while !matches!(gate.admit("user:noisy").await, RateOutcome::Shed) {}
    assert!(matches!(
        gate.admit("user:quiet").await,
        RateOutcome::Allow { fallback: true, .. }
    ));
}
