//! Persistence for signing keys and refresh-token revocation records.
//!
//! Both stores are narrow capability traits so the key manager and issuer
//! are agnostic of the backend. PostgreSQL is the durable default; Redis
//! can hold revocation records; the in-memory stores back tests and local
//! development.

pub mod memory;
pub mod postgres;
pub mod redis;

use crate::error::TokenError;
use crate::keys::SigningKey;
use crate::refresh::RevocationRecord;
use crate::metrics::STORE_LATENCY;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_common::with_deadline;
use std::future::Future;
use std::time::Duration;

pub use memory::{InMemoryKeyStore, InMemoryRevocationStore};
pub use postgres::{PgKeyStore, PgRevocationStore};
pub use self::redis::RedisRevocationStore;

/// Durable home of signing keys. Rows are written once and never updated.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert a new key. An existing `key_id` is an error.
    async fn save(&self, key: &SigningKey) -> Result<(), TokenError>;

    /// Most recently created key, if any.
    async fn find_latest(&self) -> Result<Option<SigningKey>, TokenError>;

    /// Keys that were still signing at or after `since`: every key created
    /// since then plus the newest key created before it. Oldest first.
    async fn find_signing_since(&self, since: DateTime<Utc>) -> Result<Vec<SigningKey>, TokenError>;
}

/// Durable home of refresh-token revocation records, keyed by token hash.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Insert a record. Saving a hash that already exists succeeds without
    /// creating a second record.
    async fn save(&self, record: &RevocationRecord) -> Result<(), TokenError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RevocationRecord>, TokenError>;

    /// Set the revoked flag. Returns `true` only for the call that flipped
    /// it, so concurrent refreshes of one token cannot both succeed.
    async fn update_revoked(&self, token_hash: &str) -> Result<bool, TokenError>;

    /// A never-saved hash is not revoked.
    async fn is_revoked(&self, token_hash: &str) -> Result<bool, TokenError> {
        Ok(self
            .find_by_hash(token_hash)
            .await?
            .is_some_and(|record| record.revoked))
    }

    /// Returns `false` if the record is missing or already revoked.
    async fn revoke(&self, token_hash: &str) -> Result<bool, TokenError> {
        self.update_revoked(token_hash).await
    }
}

/// Run a store call under `deadline`, recording its latency. A deadline
/// overrun surfaces as [`TokenError::StoreTimeout`].
pub(crate) async fn bounded<F, T>(
    operation: &'static str,
    store: &'static str,
    deadline: Duration,
    future: F,
) -> Result<T, TokenError>
where
    F: Future<Output = Result<T, TokenError>>,
{
    let timer = STORE_LATENCY.with_label_values(&[operation]).start_timer();
    let result = with_deadline(operation, deadline, future)
        .await
        .map_err(|e| TokenError::from_platform(store, e));
    timer.observe_duration();
    result?
}
