use crate::error::TokenError;
use crate::jwks::Jwk;
use crate::keys::model::SigningKey;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::sync::Arc;
use std::time::Duration;

/// A signing key with its parsed signing and verification material.
pub(crate) struct LoadedKey {
    pub key: SigningKey,
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub jwk: Jwk,
}

impl LoadedKey {
    pub fn load(key: SigningKey) -> Result<Self, TokenError> {
        let jwk = Jwk::from_public_pem(&key.key_id, key.algorithm, &key.public_pem)?;
        let encoding = EncodingKey::from_rsa_pem(key.private_pem.as_bytes())
            .map_err(|e| TokenError::KeyEncoding(e.to_string()))?;
        let decoding = jwk.decoding_key()?;

        Ok(LoadedKey {
            key,
            encoding,
            decoding,
            jwk,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key.key_id
    }
}

/// A key that no longer signs. `retired_at` is when its successor took
/// over, which can be later than its own `expires_at`.
#[derive(Clone)]
pub(crate) struct RetiredKey {
    pub key: Arc<LoadedKey>,
    pub retired_at: DateTime<Utc>,
}

impl RetiredKey {
    pub fn new(key: Arc<LoadedKey>, retired_at: DateTime<Utc>) -> Self {
        RetiredKey { key, retired_at }
    }

    /// Tokens it signed may be valid until `retired_at + retention`.
    pub fn verifiable_until(&self, retention: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(retention)
            .ok()
            .and_then(|window| self.retired_at.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_verifiable_at(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.verifiable_until(retention) > now
    }
}

/// Immutable snapshot of the active key and the older keys kept for
/// verification. Rotation builds a new ring and swaps it in whole.
pub(crate) struct KeyRing {
    active: Arc<LoadedKey>,
    retired: Vec<RetiredKey>,
}

impl KeyRing {
    pub fn new(active: Arc<LoadedKey>, retired: Vec<RetiredKey>) -> Self {
        KeyRing { active, retired }
    }

    pub fn active(&self) -> &Arc<LoadedKey> {
        &self.active
    }

    /// Ring with `next` active. The current active key retires at `next`'s
    /// creation time; keys past their verification window are dropped.
    pub fn rotated(&self, next: Arc<LoadedKey>, now: DateTime<Utc>, retention: Duration) -> Self {
        let retiring = RetiredKey::new(Arc::clone(&self.active), next.key.created_at);
        let retired = std::iter::once(retiring)
            .chain(self.retired.iter().cloned())
            .filter(|k| k.is_verifiable_at(now, retention))
            .collect();

        KeyRing {
            active: next,
            retired,
        }
    }

    /// Active key first, then retired keys still inside their
    /// verification window, newest first.
    pub fn verification_keys(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> impl Iterator<Item = &Arc<LoadedKey>> {
        std::iter::once(&self.active).chain(
            self.retired
                .iter()
                .filter(move |k| k.is_verifiable_at(now, retention))
                .map(|k| &k.key),
        )
    }

    pub fn find(&self, key_id: &str, now: DateTime<Utc>, retention: Duration) -> Option<&Arc<LoadedKey>> {
        self.verification_keys(now, retention)
            .find(|k| k.key_id() == key_id)
    }
}

/// Pair each stored key with the creation time of the key that followed
/// it. `keys` must be sorted oldest first; the newest key (which has no
/// successor) is skipped.
pub(crate) fn retirement_times(keys: &[SigningKey]) -> Vec<(&SigningKey, DateTime<Utc>)> {
    keys.windows(2)
        .map(|pair| (&pair[0], pair[1].created_at))
        .collect()
}
