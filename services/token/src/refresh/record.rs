use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side state of one issued refresh token, keyed by the hash of its
/// `jti`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationRecord {
    /// Hash of the token's `jti`
    pub token_hash: String,
    /// Subject the token was issued to
    pub subject: String,
    /// Same instant as the token's `exp`
    pub expires_at: DateTime<Utc>,
    /// Set once, never cleared
    pub revoked: bool,
    /// Issue time
    pub created_at: DateTime<Utc>,
}

impl RevocationRecord {
    /// Unrevoked record for a token issued at `created_at`.
    pub fn new(
        token_hash: String,
        subject: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        RevocationRecord {
            token_hash,
            subject,
            expires_at,
            revoked: false,
            created_at,
        }
    }

    /// Past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Neither revoked nor expired.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    /// Seconds until expiry, floored at one so stores that need a TTL get
    /// a valid value.
    pub fn ttl_seconds(&self, now: DateTime<Utc>) -> u64 {
        let remaining = (self.expires_at - now).num_seconds();
        u64::try_from(remaining).unwrap_or(0).max(1)
    }
}
