//! Token service error taxonomy.
//!
//! Variants map onto the failure classes the service distinguishes:
//! key generation, persistence, signing, refresh-token checks and
//! revocation lookups. Every variant has a stable code for metrics and for
//! the HTTP error body.

use rust_common::PlatformError;
use thiserror::Error;

/// Errors raised by the key manager, stores and issuer.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Key pair creation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material could not be encoded or decoded.
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    /// A store rejected or failed an operation.
    #[error("Storage error ({store}): {reason}")]
    Storage {
        /// Which store failed (`keys`, `revocations`)
        store: &'static str,
        /// Backend error text
        reason: String,
    },

    /// A store call exceeded its deadline.
    #[error("Storage deadline exceeded: {0}")]
    StoreTimeout(String),

    /// JWT could not be built or signed.
    #[error("JWT encoding error: {0}")]
    JwtEncoding(String),

    /// JWT could not be parsed or its signature did not verify.
    #[error("JWT decoding error: {0}")]
    JwtDecoding(String),

    /// Presented refresh token is not usable (wrong audience, untracked, ...).
    #[error("Refresh token invalid: {0}")]
    RefreshInvalid(String),

    /// Presented refresh token is past its expiry.
    #[error("Refresh token expired")]
    RefreshExpired,

    /// Presented refresh token has been revoked.
    #[error("Refresh token revoked")]
    RefreshRevoked,

    /// Revocation state could not be confirmed; the token is rejected.
    #[error("Revocation state unavailable: {0}")]
    RevocationUnavailable(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TokenError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error for the named store.
    #[must_use]
    pub fn storage(store: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            store,
            reason: reason.to_string(),
        }
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::KeyGeneration(_) => TOKEN_KEY_GENERATION,
            Self::KeyEncoding(_) => TOKEN_KEY_ENCODING,
            Self::Storage { .. } => TOKEN_STORAGE,
            Self::StoreTimeout(_) => TOKEN_STORE_TIMEOUT,
            Self::JwtEncoding(_) => TOKEN_JWT_ENCODING,
            Self::JwtDecoding(_) => TOKEN_JWT_DECODING,
            Self::RefreshInvalid(_) => TOKEN_REFRESH_INVALID,
            Self::RefreshExpired => TOKEN_REFRESH_EXPIRED,
            Self::RefreshRevoked => TOKEN_REFRESH_REVOKED,
            Self::RevocationUnavailable(_) => TOKEN_REVOCATION_UNAVAILABLE,
            Self::Config(_) => TOKEN_CONFIG,
            Self::Internal(_) => TOKEN_INTERNAL,
        }
    }

    /// Whether the caller may retry the operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::StoreTimeout(_) | Self::RevocationUnavailable(_)
        )
    }

    /// Whether the failure is the presented credential's fault.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::JwtDecoding(_)
                | Self::RefreshInvalid(_)
                | Self::RefreshExpired
                | Self::RefreshRevoked
                | Self::RevocationUnavailable(_)
        )
    }

    /// Map a deadline/platform failure from a store call.
    pub(crate) fn from_platform(store: &'static str, err: PlatformError) -> Self {
        match err {
            PlatformError::Timeout(msg) => Self::StoreTimeout(msg),
            other => Self::storage(store, other),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        TokenError::JwtDecoding(err.to_string())
    }
}

impl From<sqlx::Error> for TokenError {
    fn from(err: sqlx::Error) -> Self {
        TokenError::storage("postgres", err)
    }
}

impl From<redis::RedisError> for TokenError {
    fn from(err: redis::RedisError) -> Self {
        TokenError::storage("redis", err)
    }
}

/// Key pair creation failed.
pub const TOKEN_KEY_GENERATION: &str = "TOKEN_KEY_GENERATION";
/// Key material could not be encoded or decoded.
pub const TOKEN_KEY_ENCODING: &str = "TOKEN_KEY_ENCODING";
/// Store failure.
pub const TOKEN_STORAGE: &str = "TOKEN_STORAGE";
/// Store deadline exceeded.
pub const TOKEN_STORE_TIMEOUT: &str = "TOKEN_STORE_TIMEOUT";
/// Signing failure.
pub const TOKEN_JWT_ENCODING: &str = "TOKEN_JWT_ENCODING";
/// Parse or signature failure.
pub const TOKEN_JWT_DECODING: &str = "TOKEN_JWT_DECODING";
/// Refresh token unusable.
pub const TOKEN_REFRESH_INVALID: &str = "TOKEN_REFRESH_INVALID";
/// Refresh token expired.
pub const TOKEN_REFRESH_EXPIRED: &str = "TOKEN_REFRESH_EXPIRED";
/// Refresh token revoked.
pub const TOKEN_REFRESH_REVOKED: &str = "TOKEN_REFRESH_REVOKED";
/// Revocation state could not be read.
pub const TOKEN_REVOCATION_UNAVAILABLE: &str = "TOKEN_REVOCATION_UNAVAILABLE";
/// Bad configuration.
pub const TOKEN_CONFIG: &str = "TOKEN_CONFIG";
/// Internal failure.
pub const TOKEN_INTERNAL: &str = "TOKEN_INTERNAL";
