//! Claims carried by tokens from the token service.

use serde::{Deserialize, Deserializer, Serialize};

/// Claim set of a validated token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Either a single string or an array on the wire.
    #[serde(deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Not before, unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Token id; only refresh tokens carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    /// `audience` is among `aud`.
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|a| a == audience)
    }

    /// `exp` plus `leeway` is at or before `now`.
    pub fn is_expired_at(&self, now: i64, leeway: i64) -> bool {
        self.exp.saturating_add(leeway) <= now
    }

    /// `iat` minus `leeway` is after `now`.
    pub fn is_issued_in_future(&self, now: i64, leeway: i64) -> bool {
        self.iat.saturating_sub(leeway) > now
    }

    /// `nbf`, when present, minus `leeway` is after `now`.
    pub fn is_not_yet_valid(&self, now: i64, leeway: i64) -> bool {
        self.nbf.is_some_and(|nbf| nbf.saturating_sub(leeway) > now)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Audience::deserialize(deserializer)? {
        Audience::One(aud) => vec![aud],
        Audience::Many(auds) => auds,
    })
}
