//! Typed validation failures.
//!
//! Every failure carries its cause so operators can tell clock skew from a
//! missing key or an unreachable publisher. Callers facing clients should
//! only expose [`ValidationError::public_message`].

use chrono::{DateTime, Utc};
use rust_common::PlatformError;
use std::sync::Arc;
use thiserror::Error;

/// Why a token was not accepted.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    /// Token structure is malformed
    #[error("Token malformed: {reason}")]
    Malformed {
        /// Description of the malformation
        reason: String,
    },

    /// Header carries no key id
    #[error("Token header has no kid")]
    MissingKeyId,

    /// Key id absent from the key set, even after a forced refresh
    #[error("Signing key {kid} not found in key set")]
    UnknownKeyId {
        /// Key id from the token header
        kid: String,
    },

    /// Header or key algorithm differs from the accepted one
    #[error("Algorithm {found} not accepted, expected {expected}")]
    AlgorithmMismatch {
        /// Accepted algorithm
        expected: String,
        /// Algorithm presented
        found: String,
    },

    /// Token signature verification failed
    #[error("Token signature invalid")]
    InvalidSignature,

    /// `exp` is further in the past than the skew tolerance
    #[error("Token expired at {expired_at}")]
    Expired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },

    /// `iat` is further in the future than the skew tolerance
    #[error("Token issued in the future at {issued_at}")]
    IssuedInFuture {
        /// Claimed issue time
        issued_at: DateTime<Utc>,
    },

    /// `nbf` is further in the future than the skew tolerance
    #[error("Token not yet valid until {valid_from}")]
    NotYetValid {
        /// When the token becomes valid
        valid_from: DateTime<Utc>,
    },

    /// `iss` differs from the expected issuer
    #[error("Issuer {found} not accepted, expected {expected}")]
    IssuerMismatch {
        /// Expected issuer
        expected: String,
        /// Issuer presented
        found: String,
    },

    /// `aud` lacks the expected audience
    #[error("Audience {found:?} does not include {expected}")]
    AudienceMismatch {
        /// Expected audience
        expected: String,
        /// Audiences presented
        found: Vec<String>,
    },

    /// No usable key set could be obtained
    #[error("Key set unavailable: {source}")]
    KeySetUnavailable {
        /// Last fetch failure
        #[source]
        source: Arc<PlatformError>,
    },
}

impl ValidationError {
    /// Internal diagnostic code for logs and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => AUTH_TOKEN_MALFORMED,
            Self::MissingKeyId => AUTH_KEY_ID_MISSING,
            Self::UnknownKeyId { .. } => AUTH_KEY_NOT_FOUND,
            Self::AlgorithmMismatch { .. } => AUTH_ALGORITHM_MISMATCH,
            Self::InvalidSignature => AUTH_SIGNATURE_INVALID,
            Self::Expired { .. } => AUTH_TOKEN_EXPIRED,
            Self::IssuedInFuture { .. } => AUTH_TOKEN_ISSUED_IN_FUTURE,
            Self::NotYetValid { .. } => AUTH_TOKEN_NOT_YET_VALID,
            Self::IssuerMismatch { .. } => AUTH_ISSUER_MISMATCH,
            Self::AudienceMismatch { .. } => AUTH_AUDIENCE_MISMATCH,
            Self::KeySetUnavailable { .. } => AUTH_KEY_SET_UNAVAILABLE,
        }
    }

    /// Uniform rejection shown to clients.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        "unauthenticated"
    }

    /// Only key-set outages may succeed on retry; every other failure is a
    /// property of the token.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::KeySetUnavailable { .. })
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

impl From<Arc<PlatformError>> for ValidationError {
    fn from(source: Arc<PlatformError>) -> Self {
        Self::KeySetUnavailable { source }
    }
}

/// Token structure is malformed.
pub const AUTH_TOKEN_MALFORMED: &str = "AUTH_TOKEN_MALFORMED";
/// Header carries no key id.
pub const AUTH_KEY_ID_MISSING: &str = "AUTH_KEY_ID_MISSING";
/// Key id not in the key set.
pub const AUTH_KEY_NOT_FOUND: &str = "AUTH_KEY_NOT_FOUND";
/// Algorithm not accepted.
pub const AUTH_ALGORITHM_MISMATCH: &str = "AUTH_ALGORITHM_MISMATCH";
/// Signature did not verify.
pub const AUTH_SIGNATURE_INVALID: &str = "AUTH_SIGNATURE_INVALID";
/// Token expired.
pub const AUTH_TOKEN_EXPIRED: &str = "AUTH_TOKEN_EXPIRED";
/// Token issued in the future.
pub const AUTH_TOKEN_ISSUED_IN_FUTURE: &str = "AUTH_TOKEN_ISSUED_IN_FUTURE";
/// Token not yet valid.
pub const AUTH_TOKEN_NOT_YET_VALID: &str = "AUTH_TOKEN_NOT_YET_VALID";
/// Issuer not accepted.
pub const AUTH_ISSUER_MISMATCH: &str = "AUTH_ISSUER_MISMATCH";
/// Audience not accepted.
pub const AUTH_AUDIENCE_MISMATCH: &str = "AUTH_AUDIENCE_MISMATCH";
/// Key set could not be fetched.
pub const AUTH_KEY_SET_UNAVAILABLE: &str = "AUTH_KEY_SET_UNAVAILABLE";
