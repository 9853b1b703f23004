//! Keyed coalescing of concurrent identical work.
//!
//! Callers racing for the same key share one in-flight execution and all
//! receive a clone of its result. The leader removes the entry once the
//! flight lands, so a later caller starts a fresh one.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

/// A group of coalesced flights keyed by `K`.
pub struct Group<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    inflight: Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> Group<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty group.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `make()` for `key`, unless a flight for the same key is already
    /// outstanding, in which case its result is shared instead.
    ///
    /// At most one flight per key exists at any time. `make` is only invoked
    /// by the caller that becomes the leader.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (flight, leader) = {
            let mut inflight = self.inflight.lock().expect("singleflight lock poisoned");
            if let Some(existing) = inflight.get(&key) {
                (existing.clone(), false)
            } else {
                let shared = make().boxed().shared();
                inflight.insert(key.clone(), shared.clone());
                (shared, true)
            }
        };

        let value = flight.await;

        if leader {
            self.inflight
                .lock()
                .expect("singleflight lock poisoned")
                .remove(&key);
        }

        value
    }

    /// Number of outstanding flights, for observability.
    pub fn outstanding(&self) -> usize {
        self.inflight
            .lock()
            .expect("singleflight lock poisoned")
            .len()
    }
}

impl<K, V> Default for Group<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
