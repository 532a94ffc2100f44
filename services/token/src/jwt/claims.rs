use serde::{Deserialize, Serialize};

/// Claim set carried in every token body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject the token was issued for
    pub sub: String,
    /// Audiences; `access` or `refresh`
    pub aud: Vec<String>,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Only refresh tokens carry a `jti`; it keys the revocation record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    /// Claims issued at `issued_at`, expiring `ttl_seconds` later.
    pub fn new(
        issuer: String,
        subject: String,
        audience: Vec<String>,
        issued_at: i64,
        ttl_seconds: i64,
    ) -> Self {
        Claims {
            iss: issuer,
            sub: subject,
            aud: audience,
            exp: issued_at.saturating_add(ttl_seconds),
            iat: issued_at,
            jti: None,
        }
    }

    /// Attach a token id.
    pub fn with_jti(mut self, jti: String) -> Self {
        self.jti = Some(jti);
        self
    }

    /// `audience` is among `aud`.
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|a| a == audience)
    }

    /// Expired at `now`, allowing `leeway` seconds of drift.
    pub fn is_expired_at(&self, now: i64, leeway: i64) -> bool {
        self.exp.saturating_add(leeway) <= now
    }

    /// `iat` lies further in the future than `leeway` allows.
    pub fn is_issued_in_future(&self, now: i64, leeway: i64) -> bool {
        self.iat.saturating_sub(leeway) > now
    }
}
