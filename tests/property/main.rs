//! Property tests for the algorithmic cores.

use std::collections::{BTreeMap, HashMap};

use chassis::context::RequestContext;
use chassis::error::sanitize_message;
use chassis::idempotency::{payload_fingerprint, IdempotencyRecord};
use proptest::prelude::*;

/// Deterministic replica of the counter-side GCRA.
struct SimGcra {
    tat: HashMap<String, f64>,
}

impl SimGcra {
    fn new() -> Self {
        Self { tat: HashMap::new() }
    }

    fn admit(&mut self, key: &str, rate: u32, burst: u32, period: f64, now: f64) -> bool {
        let emission_interval = period / f64::from(rate);
        let tat = self.tat.get(key).copied().unwrap_or(now).max(now);
        let new_tat = tat + emission_interval;
        let allow_at = new_tat - f64::from(burst) * emission_interval;
        if allow_at <= now {
            self.tat.insert(key.to_string(), new_tat);
            true
        } else {
            false
        }
    }
}

proptest! {
    /// Two encodings of the same JSON document always fingerprint alike,
    /// whatever the key order or whitespace.
    #[test]
    fn fingerprint_is_encoding_invariant(
        entries in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 1..8)
    ) {
        let forward = entries
            .iter()
            .map(|(key, value)| format!("\"{key}\":{value}"))
            .collect::<Vec<_>>()
            .join(",");
        let backward = entries
            .iter()
            .rev()
            .map(|(key, value)| format!("\"{key}\" : {value}"))
            .collect::<Vec<_>>()
            .join(" ,\n ");

        let a = payload_fingerprint(format!("{{{forward}}}").as_bytes());
        let b = payload_fingerprint(format!("{{ {backward} }}").as_bytes());
        prop_assert_eq!(a, b);
    }

    /// Distinct documents produce distinct fingerprints (no accidental
    /// collisions from canonicalization).
    #[test]
    fn fingerprint_distinguishes_values(
        entries in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 1..8),
        bump in any::<i32>()
    ) {
        let mut altered: BTreeMap<String, i32> = entries.clone();
        let first_key = altered.keys().next().unwrap().clone();
        let original = altered[&first_key];
        prop_assume!(original != original.wrapping_add(bump.max(1)));
        altered.insert(first_key, original.wrapping_add(bump.max(1)));

        let a = payload_fingerprint(serde_json::to_vec(&entries).unwrap().as_slice());
        let b = payload_fingerprint(serde_json::to_vec(&altered).unwrap().as_slice());
        prop_assert_ne!(a, b);
    }

    /// Over any arrival pattern, admissions inside a window never exceed
    /// the sustained rate plus the burst allowance.
    #[test]
    fn gcra_never_exceeds_rate_plus_burst(
        mut arrivals in prop::collection::vec(0.0f64..30.0, 1..200)
    ) {
        arrivals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let (rate, burst, period) = (5u32, 3u32, 1.0f64);

        let mut gcra = SimGcra::new();
        let admitted = arrivals
            .iter()
            .filter(|now| gcra.admit("k", rate, burst, period, **now))
            .count() as f64;

        let window = arrivals.last().unwrap();
        // One extra covers an arrival landing exactly on a cell boundary.
        let bound = (f64::from(rate) * window + f64::from(burst)).ceil() + 1.0;
        prop_assert!(
            admitted <= bound,
            "admitted {} > bound {} over window {}",
            admitted,
            bound,
            window
        );
    }

    /// Deriving child scopes never reaches back into the parent.
    #[test]
    fn context_derivation_is_immutable(
        parent_principal in "[a-z]{1,12}",
        child_principal in "[a-z]{1,12}",
        trace in "[a-f0-9]{8}"
    ) {
        let parent = RequestContext::new()
            .with_trace_id(trace.clone())
            .with_principal_id(parent_principal.clone());

        let child = parent.clone().with_principal_id(child_principal.clone());

        prop_assert_eq!(parent.principal_id(), parent_principal.as_str());
        prop_assert_eq!(child.principal_id(), child_principal.as_str());
        prop_assert_eq!(child.trace_id(), trace.as_str());
    }

    /// Any message mentioning credential material collapses to the neutral
    /// phrase before leaving the process.
    #[test]
    fn credential_mentions_never_escape(
        prefix in "[a-z ]{0,12}",
        word in prop::sample::select(vec!["token", "password", "secret", "bearer"]),
        suffix in "[a-z ]{0,12}"
    ) {
        let sanitized = sanitize_message(&format!("{prefix}{word}{suffix}"));
        prop_assert_eq!(sanitized, "invalid request");
    }

    /// A captured response survives the store round trip byte for byte.
    #[test]
    fn captured_responses_round_trip(body in prop::collection::vec(any::<u8>(), 0..512)) {
        let record = IdempotencyRecord::completed("fp", 201, Some("application/json".into()), &body);
        let stored = serde_json::to_string(&record).unwrap();
        let loaded: IdempotencyRecord = serde_json::from_str(&stored).unwrap();

        prop_assert_eq!(loaded.status_code, Some(201));
        prop_assert_eq!(loaded.body_bytes(), body);
    }
}
