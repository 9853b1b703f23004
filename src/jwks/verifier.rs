//! Cached JWKS verifier with background and on-demand refresh.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Claims, JwksConfig, JwksDocument, KeySet};
use crate::error::ChassisError;
use crate::singleflight;

/// Ceiling for a background-tick refresh.
const BACKGROUND_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
/// Ceiling for a refresh forced from the verification path.
const EMERGENCY_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);
/// Tolerated clock skew on `exp` and `nbf`.
const CLOCK_SKEW: Duration = Duration::from_secs(60);

struct Inner {
    config: JwksConfig,
    cache: ArcSwap<KeySet>,
    refresh: singleflight::Group<&'static str, Result<(), Arc<ChassisError>>>,
    http: reqwest::Client,
}

/// Token verifier backed by a cached key set.
///
/// The cache is never empty after construction: the initial fetch must yield
/// at least one usable key or construction fails, and a failed refresh leaves
/// the previous snapshot in place. Cloning the verifier shares the cache.
#[derive(Clone)]
pub struct JwksVerifier {
    inner: Arc<Inner>,
}

impl JwksVerifier {
    /// Constructs the verifier, performing the initial key fetch.
    ///
    /// Failure here is fatal by design: a service that cannot verify tokens
    /// must not start serving.
    pub async fn new(config: JwksConfig) -> Result<Self, ChassisError> {
        if config.url.is_empty() || config.issuer.is_empty() {
            return Err(ChassisError::InvalidInput {
                reason: "jwks url and issuer are mandatory".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(BACKGROUND_REFRESH_TIMEOUT)
            .build()
            .map_err(ChassisError::from)?;

        let initial = fetch_key_set(&http, &config.url).await?;
        info!(url = %config.url, keys = initial.keys.len(), "initial key set loaded");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                cache: ArcSwap::from_pointee(initial),
                refresh: singleflight::Group::new(),
                http,
            }),
        })
    }

    /// Spawns the background refresher; it stops when `shutdown` fires.
    pub fn spawn_refresher(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let verifier = self.clone();
        let interval = self.inner.config.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the set was just fetched.
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "key refresher started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("key refresher stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = verifier.refresh(BACKGROUND_REFRESH_TIMEOUT).await {
                            error!(
                                error = %err,
                                cache_age_secs = verifier.cache_age().as_secs(),
                                "key set refresh failed"
                            );
                        } else {
                            debug!("key set refreshed");
                        }
                    }
                }
            }
        })
    }

    /// Verifies a compact JWT and returns its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, ChassisError> {
        self.enforce_staleness_ceiling().await;

        let header = decode_header(token)?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(ChassisError::TokenMalformed {
                reason: "unsupported signing algorithm".to_string(),
            });
        }
        let kid = match header.kid {
            Some(kid) if !kid.is_empty() => kid,
            _ => {
                return Err(ChassisError::TokenMalformed {
                    reason: "missing kid in header".to_string(),
                })
            }
        };

        let mut key = self.inner.cache.load().keys.get(&kid).cloned();
        if key.is_none() {
            warn!(kid = %kid, "key id not cached, forcing refresh");
            if let Err(err) = self.refresh(EMERGENCY_REFRESH_TIMEOUT).await {
                error!(error = %err, "emergency key refresh failed, rejecting token");
                return Err(ChassisError::TokenInvalid);
            }
            key = self.inner.cache.load().keys.get(&kid).cloned();
        }
        let Some(key) = key else {
            return Err(ChassisError::TokenInvalid);
        };

        let mut validation = Validation::new(header.alg);
        validation.leeway = CLOCK_SKEW.as_secs();
        // Audience is not part of the accepted claim set; tokens carrying
        // one must still verify.
        validation.validate_aud = false;
        validation.set_issuer(&[self.inner.config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<Claims>(token, &key, &validation)?;

        // `nbf` is optional; when present it gets the same skew tolerance
        // as `exp`.
        if let Some(nbf) = data.claims.nbf {
            let now = chrono::Utc::now().timestamp();
            if nbf > now + CLOCK_SKEW.as_secs() as i64 {
                return Err(ChassisError::TokenInvalid);
            }
        }

        Ok(data.claims)
    }

    /// Age of the current snapshot.
    pub fn cache_age(&self) -> Duration {
        self.inner.cache.load().age()
    }

    /// The staleness ceiling is an availability-biased alarm, not a hard
    /// cutoff: one refresh is attempted, and on failure tokens signed by the
    /// cached keys keep verifying while the failure is screamed about.
    async fn enforce_staleness_ceiling(&self) {
        let age = self.cache_age();
        if age <= self.inner.config.max_stale {
            return;
        }
        if let Err(err) = self.refresh(EMERGENCY_REFRESH_TIMEOUT).await {
            error!(
                cache_age_secs = age.as_secs(),
                max_stale_secs = self.inner.config.max_stale.as_secs(),
                error = %err,
                "key set exceeded staleness ceiling and refresh failed; continuing with cached keys"
            );
        }
    }

    /// Refreshes the cached set, coalescing concurrent attempts into one
    /// fetch. A failed fetch never replaces the cache.
    async fn refresh(&self, ceiling: Duration) -> Result<(), Arc<ChassisError>> {
        let inner = self.inner.clone();
        self.inner
            .refresh
            .run("refresh", move || async move {
                let fetched =
                    tokio::time::timeout(ceiling, fetch_key_set(&inner.http, &inner.config.url))
                        .await;
                match fetched {
                    Ok(Ok(set)) => {
                        inner.cache.store(Arc::new(set));
                        Ok(())
                    }
                    Ok(Err(err)) => Err(Arc::new(err)),
                    Err(_) => Err(Arc::new(ChassisError::Timeout { duration: ceiling })),
                }
            })
            .await
    }
}

async fn fetch_key_set(http: &reqwest::Client, url: &str) -> Result<KeySet, ChassisError> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ChassisError::KeySetUnavailable {
            reason: format!("endpoint returned status {}", response.status()),
        });
    }
    let document: JwksDocument = response.json().await?;
    KeySet::from_document(document)
}
