use crate::error::TokenError;
use crate::keys::SigningKey;
use crate::refresh::RevocationRecord;
use crate::storage::{KeyStore, RevocationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local key store. Keys are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<Vec<SigningKey>>,
}

impl InMemoryKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// No keys stored.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn save(&self, key: &SigningKey) -> Result<(), TokenError> {
        let mut keys = self.keys.write();
        if keys.iter().any(|k| k.key_id == key.key_id) {
            return Err(TokenError::storage(
                "keys",
                format!("duplicate key id {}", key.key_id),
            ));
        }
        keys.push(key.clone());
        Ok(())
    }

    async fn find_latest(&self) -> Result<Option<SigningKey>, TokenError> {
        Ok(self.keys.read().iter().max_by_key(|k| k.created_at).cloned())
    }

    async fn find_signing_since(&self, since: DateTime<Utc>) -> Result<Vec<SigningKey>, TokenError> {
        let mut keys = self.keys.read().clone();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let first_recent = keys.partition_point(|k| k.created_at < since);
        Ok(keys.split_off(first_recent.saturating_sub(1)))
    }
}

/// Process-local revocation store.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    records: RwLock<HashMap<String, RevocationRecord>>,
}

impl InMemoryRevocationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// No records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn save(&self, record: &RevocationRecord) -> Result<(), TokenError> {
        self.records
            .write()
            .entry(record.token_hash.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RevocationRecord>, TokenError> {
        Ok(self.records.read().get(token_hash).cloned())
    }

    async fn update_revoked(&self, token_hash: &str) -> Result<bool, TokenError> {
        match self.records.write().get_mut(token_hash) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
