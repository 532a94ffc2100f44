use crate::error::TokenError;
use crate::refresh::RevocationRecord;
use crate::storage::RevocationStore;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::instrument;

/// Flip `revoked` inside Redis so that read, check and write are one step.
/// Returns 1 only when this call changed the flag; KEEPTTL preserves the
/// record's expiry.
const REVOKE_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
local record = cjson.decode(value)
if record.revoked then
    return 0
end
record.revoked = true
redis.call('SET', KEYS[1], cjson.encode(record), 'KEEPTTL')
return 1
"#;

/// Revocation records in Redis. Each key expires with its token, so expired
/// records clean themselves up.
#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    revoke: Script,
}

impl RedisRevocationStore {
    /// Connect to `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self, TokenError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisRevocationStore {
            conn,
            revoke: Script::new(REVOKE_SCRIPT),
        })
    }

    fn record_key(token_hash: &str) -> String {
        format!("refresh_token:{}", token_hash)
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    #[instrument(skip(self, record))]
    async fn save(&self, record: &RevocationRecord) -> Result<(), TokenError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(record)
            .map_err(|e| TokenError::Internal(e.to_string()))?;

        // NX leaves an existing record untouched.
        let _: Option<String> = redis::cmd("SET")
            .arg(Self::record_key(&record.token_hash))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(record.ttl_seconds(Utc::now()))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, token_hash))]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RevocationRecord>, TokenError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::record_key(token_hash)).await?;

        match value {
            Some(v) => {
                let record: RevocationRecord = serde_json::from_str(&v)
                    .map_err(|e| TokenError::Internal(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, token_hash))]
    async fn update_revoked(&self, token_hash: &str) -> Result<bool, TokenError> {
        let mut conn = self.conn.clone();
        let flipped: i64 = self
            .revoke
            .key(Self::record_key(token_hash))
            .invoke_async(&mut conn)
            .await?;

        Ok(flipped == 1)
    }
}
