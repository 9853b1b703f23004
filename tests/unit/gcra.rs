//! GCRA arithmetic under a simulated clock.
//!
//! Mirrors the server-side script: one stored timestamp per key, admission
//! when the would-be arrival time falls inside the delay tolerance.

use std::collections::HashMap;

/// Deterministic replica of the counter-side algorithm.
struct SimGcra {
    tat: HashMap<String, f64>,
}

impl SimGcra {
    fn new() -> Self {
        Self { tat: HashMap::new() }
    }

    /// Returns -1 on admit, otherwise whole seconds until the next
    /// conforming arrival.
    fn check(&mut self, key: &str, rate: u32, burst: u32, period: f64, now: f64) -> i64 {
        let emission_interval = period / f64::from(rate);
        let tat = self.tat.get(key).copied().unwrap_or(now).max(now);
        let new_tat = tat + emission_interval;
        let allow_at = new_tat - f64::from(burst) * emission_interval;

        if allow_at <= now {
            self.tat.insert(key.to_string(), new_tat);
            -1
        } else {
            (allow_at - now).ceil() as i64
        }
    }
}

#[test]
fn burst_of_thirty_instant_requests_admits_exactly_ten() {
    let mut gcra = SimGcra::new();
    let mut admitted = 0;
    let mut denied = Vec::new();

    for _ in 0..30 {
        match gcra.check("rl:user:alice", 10, 10, 1.0, 100.0) {
            -1 => admitted += 1,
            retry => denied.push(retry),
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(denied.len(), 20);
    assert!(denied.iter().all(|retry| (1..=3).contains(retry)));

    // One second later a single extra slot has opened.
    assert_eq!(gcra.check("rl:user:alice", 10, 10, 1.0, 101.0), -1);
    assert_ne!(gcra.check("rl:user:alice", 10, 10, 1.0, 101.0), -1);
}

#[test]
fn burst_of_one_paces_at_the_emission_interval() {
    let mut gcra = SimGcra::new();

    assert_eq!(gcra.check("k", 10, 1, 1.0, 50.0), -1);
    assert_ne!(gcra.check("k", 10, 1, 1.0, 50.05), -1);
    assert_eq!(gcra.check("k", 10, 1, 1.0, 50.1), -1);
    assert_ne!(gcra.check("k", 10, 1, 1.0, 50.15), -1);
}

#[test]
fn denials_do_not_advance_state() {
    let mut gcra = SimGcra::new();
    for _ in 0..10 {
        assert_eq!(gcra.check("k", 10, 10, 1.0, 0.0), -1);
    }
    // Hammering the denied key does not push recovery further out.
    for _ in 0..100 {
        assert_eq!(gcra.check("k", 10, 10, 1.0, 0.0), 1);
    }
    assert_eq!(gcra.check("k", 10, 10, 1.0, 1.0), -1);
}

#[test]
fn keys_are_independent() {
    let mut gcra = SimGcra::new();
    while gcra.check("rl:ip:10.0.0.1", 5, 5, 1.0, 0.0) == -1 {}
    assert_eq!(gcra.check("rl:ip:10.0.0.2", 5, 5, 1.0, 0.0), -1);
}

#[test]
fn idle_identity_recovers_full_burst() {
    let mut gcra = SimGcra::new();
    for _ in 0..5 {
        assert_eq!(gcra.check("k", 5, 5, 1.0, 0.0), -1);
    }
    // After two idle periods the stored timestamp is in the past again.
    let mut admitted = 0;
    while gcra.check("k", 5, 5, 1.0, 10.0) == -1 {
        admitted += 1;
    }
    assert_eq!(admitted, 5);
}
