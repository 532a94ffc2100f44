//! Time-based cache of the publisher's key set.
//!
//! - Entries older than the refresh interval are refreshed before use
//!   (blocking); with [`StalePolicy::ServeStale`] a failed refresh falls
//!   back to the old entry.
//! - An unknown `kid` forces one refresh before the lookup fails, at most
//!   once per `forced_refresh_min_interval`.
//! - Concurrent refreshes share one in-flight fetch.
//! - Fetches retry transient failures with exponential backoff.

use crate::config::{StalePolicy, ValidatorConfig};
use crate::error::ValidationError;
use crate::metrics::ValidatorMetrics;
use arc_swap::ArcSwapOption;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::Mutex;
use rust_common::{build_http_client, HttpConfig, PlatformError, RetryPolicy, ShutdownSignal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// JSON Web Key structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA)
    pub kty: String,
    /// Key ID
    pub kid: String,
    /// Key use (sig, enc)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// JSON Web Key Set structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys
    pub keys: Vec<Jwk>,
}

/// A verification key taken from the key set.
pub struct CachedKey {
    pub(crate) key: DecodingKey,
    /// Algorithm the publisher declared for this key, if any.
    pub algorithm: Option<Algorithm>,
}

/// One successfully fetched key set.
pub struct CachedKeySet {
    keys: HashMap<String, Arc<CachedKey>>,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn from_jwks(jwks: &Jwks) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            match jwk_to_cached_key(jwk) {
                Some(key) => {
                    keys.insert(jwk.kid.clone(), Arc::new(key));
                }
                None => warn!(kid = %jwk.kid, kty = %jwk.kty, "Skipping unusable key"),
            }
        }
        Self {
            keys,
            fetched_at: Instant::now(),
        }
    }

    /// Key for `kid`, if present.
    pub fn get(&self, kid: &str) -> Option<Arc<CachedKey>> {
        self.keys.get(kid).cloned()
    }

    /// Number of usable keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no usable keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Time since the set was fetched.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Converts a JWK to a verification key.
fn jwk_to_cached_key(jwk: &Jwk) -> Option<CachedKey> {
    if jwk.kty != "RSA" {
        return None;
    }
    if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
        return None;
    }
    let algorithm = match jwk.alg.as_deref() {
        Some(alg) => Some(Algorithm::from_str(alg).ok()?),
        None => None,
    };
    let key = DecodingKey::from_rsa_components(jwk.n.as_deref()?, jwk.e.as_deref()?).ok()?;
    Some(CachedKey { key, algorithm })
}

type RefreshResult = Result<Arc<CachedKeySet>, Arc<PlatformError>>;
type InflightFuture = Shared<BoxFuture<'static, RefreshResult>>;

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Cache empty or past its refresh interval, or the periodic loop.
    Scheduled,
    /// A token named a `kid` the cached set does not have.
    UnknownKey,
}

#[derive(Default)]
struct RefreshState {
    inflight: Option<InflightFuture>,
    last_forced: Option<Instant>,
}

/// Key-set cache with single-flight refresh.
pub struct JwkCache {
    cache: Arc<ArcSwapOption<CachedKeySet>>,
    refresh: Mutex<RefreshState>,
    http_client: reqwest::Client,
    jwks_url: Url,
    refresh_interval: Duration,
    stale_policy: StalePolicy,
    forced_refresh_min_interval: Duration,
    retry: RetryPolicy,
    metrics: ValidatorMetrics,
}

impl JwkCache {
    /// Creates an empty cache. Nothing is fetched until the first lookup
    /// or the first tick of [`JwkCache::run_refresh_loop`].
    pub fn new(config: &ValidatorConfig, metrics: ValidatorMetrics) -> Result<Self, PlatformError> {
        let http_client = build_http_client(
            &HttpConfig::default()
                .with_timeout(config.fetch_timeout)
                .with_user_agent("auth-edge-jwks"),
        )?;

        Ok(Self {
            cache: Arc::new(ArcSwapOption::empty()),
            refresh: Mutex::new(RefreshState::default()),
            http_client,
            jwks_url: config.jwks_url.clone(),
            refresh_interval: config.refresh_interval,
            stale_policy: config.stale_policy,
            forced_refresh_min_interval: config.forced_refresh_min_interval,
            retry: RetryPolicy::new(config.retry_config()),
            metrics,
        })
    }

    /// Gets the verification key for `kid`.
    ///
    /// Refreshes first if the cache is empty or older than the refresh
    /// interval, and once more if `kid` is not in the set and no forced
    /// refresh started within the minimum interval.
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<CachedKey>, ValidationError> {
        let current = self.current().await?;
        if let Some(key) = current.get(kid) {
            return Ok(key);
        }

        debug!("Key not in cached set, forcing refresh");
        let refreshed = self
            .refresh_after(Some(current.fetched_at), Trigger::UnknownKey)
            .await?;
        refreshed
            .get(kid)
            .ok_or_else(|| ValidationError::UnknownKeyId {
                kid: kid.to_string(),
            })
    }

    /// The cached set, refreshed first if missing or expired.
    async fn current(&self) -> Result<Arc<CachedKeySet>, ValidationError> {
        let Some(cached) = self.cache.load_full() else {
            return self.refresh_after(None, Trigger::Scheduled).await;
        };
        if cached.age() < self.refresh_interval {
            return Ok(cached);
        }

        match self.refresh_after(Some(cached.fetched_at), Trigger::Scheduled).await {
            Ok(fresh) => Ok(fresh),
            Err(e) if self.stale_policy == StalePolicy::ServeStale => {
                warn!(error = %e, age_secs = cached.age().as_secs(), "Refresh failed, serving stale key set");
                self.metrics.record_fetch("stale");
                Ok(cached)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh unless someone already replaced the set the caller looked
    /// at (`observed`). Joins an in-flight fetch when there is one.
    ///
    /// An unknown-key refresh inside the minimum interval of the previous
    /// one returns the current set unchanged.
    async fn refresh_after(
        &self,
        observed: Option<Instant>,
        trigger: Trigger,
    ) -> Result<Arc<CachedKeySet>, ValidationError> {
        let fetch = {
            let mut state = self.refresh.lock();

            let current = self.cache.load_full();
            if let Some(current) = &current {
                if observed.map_or(true, |seen| current.fetched_at > seen) {
                    return Ok(Arc::clone(current));
                }
            }

            let running = state
                .inflight
                .as_ref()
                .filter(|fetch| fetch.peek().is_none())
                .cloned();
            if let Some(fetch) = running {
                fetch
            } else {
                if trigger == Trigger::UnknownKey {
                    let throttled = state
                        .last_forced
                        .is_some_and(|at| at.elapsed() < self.forced_refresh_min_interval);
                    if let (true, Some(current)) = (throttled, current) {
                        debug!("Forced refresh skipped, previous one too recent");
                        self.metrics.record_fetch("throttled");
                        return Ok(current);
                    }
                    state.last_forced = Some(Instant::now());
                }
                let fetch = self.fetch().shared();
                state.inflight = Some(fetch.clone());
                fetch
            }
        };

        fetch.await.map_err(ValidationError::from)
    }

    /// Fetch with retries and publish the result into the cache.
    fn fetch(&self) -> BoxFuture<'static, RefreshResult> {
        let client = self.http_client.clone();
        let url = self.jwks_url.clone();
        let retry = self.retry.clone();
        let cache = Arc::clone(&self.cache);
        let metrics = self.metrics.clone();

        async move {
            let result = retry
                .execute("jwks_fetch", || fetch_once(&client, &url))
                .await;

            match result {
                Ok(jwks) => {
                    let set = Arc::new(CachedKeySet::from_jwks(&jwks));
                    if set.is_empty() {
                        metrics.record_fetch("failure");
                        warn!(url = %url, "Key set has no usable keys, keeping previous set");
                        return Err(Arc::new(PlatformError::unavailable(
                            "key set has no usable keys",
                        )));
                    }
                    cache.store(Some(Arc::clone(&set)));
                    metrics.record_fetch("success");
                    metrics.cached_keys.set(i64::try_from(set.len()).unwrap_or(i64::MAX));
                    info!(url = %url, keys = set.len(), "Key set refreshed");
                    Ok(set)
                }
                Err(e) => {
                    metrics.record_fetch("failure");
                    warn!(url = %url, error = %e, "Key set fetch failed");
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
    }

    /// Refresh on the configured interval until shutdown. The first tick
    /// fires immediately and warms the cache.
    pub async fn run_refresh_loop(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.recv() => {
                    info!("Key set refresh loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let observed = self.cache.load().as_ref().map(|set| set.fetched_at);
                    // Failures are logged and counted inside the fetch.
                    let _ = self.refresh_after(observed, Trigger::Scheduled).await;
                }
            }
        }
    }

    /// Drops the cached set so the next lookup fetches.
    pub fn invalidate(&self) {
        self.cache.store(None);
    }

    /// Number of keys in the cached set.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.cache.load().as_ref().map_or(0, |set| set.len())
    }

    /// Whether the cache is empty or older than the refresh interval.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.cache
            .load()
            .as_ref()
            .map_or(true, |set| set.age() >= self.refresh_interval)
    }
}

async fn fetch_once(client: &reqwest::Client, url: &Url) -> Result<Jwks, PlatformError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PlatformError::UpstreamStatus {
            status: status.as_u16(),
        });
    }
    let jwks = response.json::<Jwks>().await?;
    Ok(jwks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwk(kid: &str) -> serde_json::Value {
        json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw",
            "e": "AQAB"
        })
    }

    fn metrics() -> ValidatorMetrics {
        ValidatorMetrics::new(&Registry::new()).unwrap()
    }

    fn config(server: &MockServer) -> ValidatorConfig {
        let url = Url::parse(&format!("{}/.well-known/jwks.json", server.uri())).unwrap();
        ValidatorConfig::new(url).with_fetch_retries(2, Duration::from_millis(10))
    }

    async fn serve_keys(server: &MockServer, kids: &[&str]) {
        let keys: Vec<_> = kids.iter().map(|k| jwk(k)).collect();
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_lookup_populates_cache() {
        let server = MockServer::start().await;
        serve_keys(&server, &["k1"]).await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        assert!(cache.is_stale());

        let key = cache.get_key("k1").await.unwrap();
        assert_eq!(key.algorithm, Some(Algorithm::RS256));
        assert_eq!(cache.key_count(), 1);
        assert!(!cache.is_stale());
    }

    #[tokio::test]
    async fn test_fresh_cache_does_not_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        for _ in 0..5 {
            cache.get_key("k1").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unknown_kid_forces_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [jwk("k2"), jwk("k1")] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        cache.get_key("k1").await.unwrap();

        // k2 appears only after the forced refresh.
        cache.get_key("k2").await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_unknown_kids_force_one_refresh_per_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        cache.get_key("k1").await.unwrap();

        // One forced refresh, then the rest are answered from the cache.
        for i in 0..20 {
            let kid = format!("junk-{i}");
            let err = cache.get_key(&kid).await.err().unwrap();
            assert!(matches!(err, ValidationError::UnknownKeyId { .. }));
        }
        assert_eq!(cache.key_count(), 1);
    }

    #[tokio::test]
    async fn test_forced_refresh_allowed_again_after_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [jwk("k3"), jwk("k1")] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = config(&server).with_forced_refresh_min_interval(Duration::from_millis(50));
        let cache = JwkCache::new(&config, metrics()).unwrap();
        cache.get_key("k1").await.unwrap();

        assert!(cache.get_key("k2").await.is_err());
        assert!(cache.get_key("k3").await.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.get_key("k3").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kid_after_refresh_is_typed() {
        let server = MockServer::start().await;
        serve_keys(&server, &["k1"]).await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        let err = cache.get_key("missing").await.err().unwrap();
        assert!(matches!(err, ValidationError::UnknownKeyId { ref kid } if kid == "missing"));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [jwk("k1")] }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(JwkCache::new(&config(&server), metrics()).unwrap());
        let lookups: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_key("k1").await.map(|_| ()) })
            })
            .collect();

        for lookup in lookups {
            lookup.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        serve_keys(&server, &["k1"]).await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        assert!(cache.get_key("k1").await.is_ok());
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        let err = cache.get_key("k1").await.err().unwrap();
        assert!(matches!(err, ValidationError::KeySetUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        assert!(cache.get_key("k1").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_cache_rejects_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = config(&server).with_refresh_interval(Duration::from_millis(50));
        let cache = JwkCache::new(&config, metrics()).unwrap();
        cache.get_key("k1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = cache.get_key("k1").await.err().unwrap();
        assert!(matches!(err, ValidationError::KeySetUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_expired_cache_served_stale_when_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = config(&server)
            .with_refresh_interval(Duration::from_millis(50))
            .with_stale_policy(StalePolicy::ServeStale);
        let cache = JwkCache::new(&config, metrics()).unwrap();
        cache.get_key("k1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get_key("k1").await.is_ok());
        assert!(cache.is_stale());
    }

    #[tokio::test]
    async fn test_expired_cache_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk("k1")] })))
            .expect(2)
            .mount(&server)
            .await;

        let config = config(&server).with_refresh_interval(Duration::from_millis(50));
        let cache = JwkCache::new(&config, metrics()).unwrap();
        cache.get_key("k1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.get_key("k1").await.unwrap();
        assert!(!cache.is_stale());
    }

    #[tokio::test]
    async fn test_unusable_keys_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [
                    { "kty": "EC", "kid": "ec", "crv": "P-256", "x": "x", "y": "y" },
                    { "kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB" },
                    jwk("k1")
                ]
            })))
            .mount(&server)
            .await;

        let cache = JwkCache::new(&config(&server), metrics()).unwrap();
        cache.get_key("k1").await.unwrap();
        assert_eq!(cache.key_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_loop_warms_cache_and_stops() {
        let server = MockServer::start().await;
        serve_keys(&server, &["k1"]).await;

        let cache = Arc::new(JwkCache::new(&config(&server), metrics()).unwrap());
        let coordinator = rust_common::ShutdownCoordinator::new();
        let handle = tokio::spawn(Arc::clone(&cache).run_refresh_loop(coordinator.subscribe()));

        for _ in 0..50 {
            if cache.key_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(cache.key_count(), 1);

        coordinator.shutdown(Duration::from_secs(1)).await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
