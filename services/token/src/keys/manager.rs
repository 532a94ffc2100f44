//! Owner of the active signing key.
//!
//! The manager holds an immutable [`KeyRing`] behind a reader/writer lock.
//! Signers take the read lock only long enough to clone the ring's `Arc`,
//! so signing never waits on key generation or on the store. Rotation
//! generates the next key on the blocking pool, persists it, and only then
//! takes the write lock to swap the ring.

use crate::config::{JwtAlgorithm, KeyPolicy};
use crate::error::TokenError;
use crate::jwks::Jwks;
use crate::jwt::{Claims, JwtSerializer};
use crate::keys::generator::RsaKeyGenerator;
use crate::keys::ring::{retirement_times, KeyRing, LoadedKey, RetiredKey};
use crate::metrics::KEY_ROTATIONS;
use crate::storage::{bounded, KeyStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_common::ShutdownSignal;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

/// Owns the active signing key and the retired keys still needed to
/// verify outstanding tokens. One instance per process.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    generator: RsaKeyGenerator,
    policy: KeyPolicy,
    serializer: JwtSerializer,
    ring: RwLock<Arc<KeyRing>>,
    rotation: tokio::sync::Mutex<()>,
}

impl KeyManager {
    /// Load the newest stored key, or create one if the store is empty or
    /// the newest key is past its signing window. Older keys still inside
    /// their verification window, counted from when their successor was
    /// created, are loaded for verification.
    ///
    /// Any failure here is fatal to startup.
    #[instrument(skip(store, policy))]
    pub async fn initialize(store: Arc<dyn KeyStore>, policy: KeyPolicy) -> Result<Self, TokenError> {
        let generator = RsaKeyGenerator::new(policy.rsa_bits, policy.algorithm);
        let now = Utc::now();

        let latest = bounded("keys.find_latest", "keys", policy.store_timeout, store.find_latest()).await?;

        let active = match latest {
            Some(key) if !key.is_expired_at(now) => {
                info!(kid = %key.key_id, expires_at = %key.expires_at, "Loaded signing key");
                Arc::new(LoadedKey::load(key)?)
            }
            Some(key) => {
                info!(kid = %key.key_id, "Latest signing key expired, rotating");
                create_key(store.as_ref(), &generator, &policy).await?
            }
            None => {
                info!("No signing key stored, creating the first one");
                create_key(store.as_ref(), &generator, &policy).await?
            }
        };

        let retention = policy.retention();
        let since = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stored = bounded(
            "keys.find_signing_since",
            "keys",
            policy.store_timeout,
            store.find_signing_since(since),
        )
        .await?;

        let mut retired = Vec::with_capacity(stored.len());
        for (key, retired_at) in retirement_times(&stored) {
            if key.key_id == active.key_id() {
                continue;
            }
            match LoadedKey::load(key.clone()) {
                Ok(loaded) => {
                    let candidate = RetiredKey::new(Arc::new(loaded), retired_at);
                    if candidate.is_verifiable_at(now, retention) {
                        retired.push(candidate);
                    }
                }
                Err(e) => warn!(kid = %key.key_id, error = %e, "Skipping unreadable retired key"),
            }
        }
        // Newest first, like rotation produces.
        retired.reverse();

        info!(
            kid = %active.key_id(),
            retired = retired.len(),
            "Key manager initialized"
        );

        Ok(KeyManager {
            store,
            generator,
            serializer: JwtSerializer::new(policy.algorithm.jsonwebtoken()),
            policy,
            ring: RwLock::new(Arc::new(KeyRing::new(active, retired))),
            rotation: tokio::sync::Mutex::new(()),
        })
    }

    fn snapshot(&self) -> Arc<KeyRing> {
        Arc::clone(&self.ring.read())
    }

    /// Create, persist and activate a new signing key. Returns its id.
    ///
    /// On failure the previous key stays active.
    #[instrument(skip(self))]
    pub async fn rotate(&self) -> Result<String, TokenError> {
        let _rotating = self.rotation.lock().await;

        let next = match create_key(self.store.as_ref(), &self.generator, &self.policy).await {
            Ok(next) => next,
            Err(e) => {
                KEY_ROTATIONS.with_label_values(&["failure"]).inc();
                error!(error = %e, "Key rotation failed");
                return Err(e);
            }
        };
        let key_id = next.key_id().to_string();

        {
            let mut ring = self.ring.write();
            let rotated = ring.rotated(next, Utc::now(), self.policy.retention());
            *ring = Arc::new(rotated);
        }

        KEY_ROTATIONS.with_label_values(&["success"]).inc();
        info!(kid = %key_id, "Signing key rotated");
        Ok(key_id)
    }

    /// Sign `claims` with the active key. No I/O.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let ring = self.snapshot();
        let active = ring.active();
        self.serializer.serialize(claims, &active.encoding, active.key_id())
    }

    /// Verify a token's signature against the active or a retained key.
    /// Time-based claims are not checked.
    pub fn verify_signature(&self, token: &str) -> Result<Claims, TokenError> {
        let header = self.serializer.header(token)?;
        let key_id = header
            .kid
            .ok_or_else(|| TokenError::JwtDecoding("token header has no kid".to_string()))?;

        let ring = self.snapshot();
        let key = ring
            .find(&key_id, Utc::now(), self.policy.retention())
            .ok_or_else(|| TokenError::JwtDecoding(format!("unknown kid {key_id}")))?;

        self.serializer.verify_signature(token, &key.decoding)
    }

    /// Public halves of the active and retained keys.
    pub fn public_key_set(&self) -> Jwks {
        self.public_key_set_at(Utc::now())
    }

    /// Key set as it stands at `now`.
    pub fn public_key_set_at(&self, now: DateTime<Utc>) -> Jwks {
        let ring = self.snapshot();
        Jwks {
            keys: ring
                .verification_keys(now, self.policy.retention())
                .map(|k| k.jwk.clone())
                .collect(),
        }
    }

    /// Id of the key new tokens are signed with.
    pub fn active_key_id(&self) -> String {
        self.snapshot().active().key_id().to_string()
    }

    /// Signing algorithm.
    pub fn algorithm(&self) -> JwtAlgorithm {
        self.policy.algorithm
    }

    /// The active key has passed its signing window.
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        self.snapshot().active().key.is_expired_at(now)
    }

    /// Rotate whenever the active key expires, checking on the configured
    /// interval until shutdown. Failed rotations are retried on the next
    /// tick; the expired key keeps signing meanwhile.
    pub async fn run_rotation_loop(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.policy.rotation_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.recv() => {
                    info!("Key rotation loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if self.rotation_due(Utc::now()) {
                        // Errors are logged and counted by rotate().
                        let _ = self.rotate().await;
                    }
                }
            }
        }
    }
}

/// Generate a key off the async runtime, then persist it under the store
/// deadline. Nothing is activated here.
async fn create_key(
    store: &dyn KeyStore,
    generator: &RsaKeyGenerator,
    policy: &KeyPolicy,
) -> Result<Arc<LoadedKey>, TokenError> {
    let generator = generator.clone();
    let lifetime = policy.signing_lifetime;
    let now = Utc::now();

    let key = tokio::task::spawn_blocking(move || generator.generate(now, lifetime))
        .await
        .map_err(|e| TokenError::Internal(format!("key generation task failed: {e}")))??;

    let loaded = LoadedKey::load(key)?;
    bounded("keys.save", "keys", policy.store_timeout, store.save(&loaded.key)).await?;

    Ok(Arc::new(loaded))
}
