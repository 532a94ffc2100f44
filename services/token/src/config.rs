//! Centralized configuration for Token Service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup.

use crate::error::TokenError;
use std::env;
use std::time::Duration;

/// JWT signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256
    RS256,
}

impl JwtAlgorithm {
    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self, TokenError> {
        match s.to_uppercase().as_str() {
            "RS256" => Ok(Self::RS256),
            _ => Err(TokenError::config(format!("Unsupported JWT algorithm: {s}"))),
        }
    }

    /// Get algorithm name for JWT header and JWK `alg`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
        }
    }

    /// The jsonwebtoken equivalent.
    #[must_use]
    pub const fn jsonwebtoken(&self) -> jsonwebtoken::Algorithm {
        match self {
            Self::RS256 => jsonwebtoken::Algorithm::RS256,
        }
    }
}

/// Where signing keys are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreBackend {
    /// PostgreSQL `signing_keys` table
    Postgres,
    /// Process memory (development and tests only)
    Memory,
}

/// Where refresh-token revocation records are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStoreBackend {
    /// PostgreSQL `refresh_tokens` table
    Postgres,
    /// Redis keys with TTL
    Redis,
    /// Process memory (development and tests only)
    Memory,
}

/// Signing-key lifecycle policy.
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    /// Signature scheme for new keys
    pub algorithm: JwtAlgorithm,
    /// RSA modulus size in bits
    pub rsa_bits: usize,
    /// How long a key signs new tokens; becomes `expires_at`
    pub signing_lifetime: Duration,
    /// Longest lifetime of any token signed with a key. A retired key stays
    /// in the published set until its successor's creation plus
    /// `max_token_ttl + clock_skew`.
    pub max_token_ttl: Duration,
    /// Clock drift tolerated by verifiers
    pub clock_skew: Duration,
    /// How often the background task checks whether rotation is due
    pub rotation_check_interval: Duration,
    /// Deadline for each key store call
    pub store_timeout: Duration,
}

impl KeyPolicy {
    /// How long a key stays verifiable after it stops signing.
    pub fn retention(&self) -> Duration {
        self.max_token_ttl.saturating_add(self.clock_skew)
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            algorithm: JwtAlgorithm::RS256,
            rsa_bits: 2048,
            signing_lifetime: Duration::from_secs(30 * 24 * 3600),
            max_token_ttl: Duration::from_secs(604_800),
            clock_skew: Duration::from_secs(60),
            rotation_check_interval: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Issuance policy for access/refresh tokens.
#[derive(Debug, Clone)]
pub struct IssuerPolicy {
    /// `iss` claim
    pub issuer: String,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// `aud` of access tokens
    pub access_audience: String,
    /// `aud` of refresh tokens
    pub refresh_audience: String,
    /// Tolerated clock drift when checking a presented refresh token
    pub clock_skew: Duration,
    /// Deadline for each revocation store call
    pub store_timeout: Duration,
}

impl Default for IssuerPolicy {
    fn default() -> Self {
        Self {
            issuer: "auth-service".to_string(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            access_audience: "access".to_string(),
            refresh_audience: "refresh".to_string(),
            clock_skew: Duration::from_secs(60),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Token Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Key lifecycle policy
    pub keys: KeyPolicy,
    /// Issuance policy
    pub issuer: IssuerPolicy,
    /// Key store backend
    pub key_store: KeyStoreBackend,
    /// Revocation store backend
    pub revocation_store: RevocationStoreBackend,
    /// PostgreSQL connection string
    pub database_url: Option<String>,
    /// Redis connection string
    pub redis_url: Option<String>,
    /// Max PostgreSQL pool size
    pub database_max_connections: u32,
    /// Graceful shutdown budget
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if variables are malformed or inconsistent.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_env("PORT", 8080)?;

        let access_token_ttl = Duration::from_secs(parse_env("ACCESS_TOKEN_TTL", 900)?);
        let refresh_token_ttl = Duration::from_secs(parse_env("REFRESH_TOKEN_TTL", 604_800)?);
        let store_timeout = Duration::from_secs(parse_env("STORE_TIMEOUT", 5)?);
        let clock_skew = Duration::from_secs(parse_env("CLOCK_SKEW", 60)?);

        let keys = KeyPolicy {
            algorithm: JwtAlgorithm::parse(
                &env::var("JWT_ALGORITHM").unwrap_or_else(|_| "RS256".to_string()),
            )?,
            rsa_bits: parse_env("RSA_KEY_BITS", 2048)?,
            signing_lifetime: Duration::from_secs(parse_env(
                "SIGNING_KEY_LIFETIME",
                30 * 24 * 3600,
            )?),
            max_token_ttl: access_token_ttl.max(refresh_token_ttl),
            clock_skew,
            rotation_check_interval: Duration::from_secs(parse_env(
                "KEY_ROTATION_CHECK_INTERVAL",
                3600,
            )?),
            store_timeout,
        };

        let issuer = IssuerPolicy {
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "auth-service".to_string()),
            access_token_ttl,
            refresh_token_ttl,
            access_audience: env::var("ACCESS_AUDIENCE").unwrap_or_else(|_| "access".to_string()),
            refresh_audience: env::var("REFRESH_AUDIENCE")
                .unwrap_or_else(|_| "refresh".to_string()),
            clock_skew,
            store_timeout,
        };

        let key_store = match env::var("KEY_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => KeyStoreBackend::Postgres,
            "memory" => KeyStoreBackend::Memory,
            other => return Err(TokenError::config(format!("Unknown KEY_STORE: {other}"))),
        };

        let revocation_store = match env::var("REVOCATION_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => RevocationStoreBackend::Postgres,
            "redis" => RevocationStoreBackend::Redis,
            "memory" => RevocationStoreBackend::Memory,
            other => {
                return Err(TokenError::config(format!(
                    "Unknown REVOCATION_STORE: {other}"
                )))
            }
        };

        let config = Self {
            host,
            port,
            keys,
            issuer,
            key_store,
            revocation_store,
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT", 30)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    fn validate(&self) -> Result<(), TokenError> {
        if self.issuer.access_token_ttl.is_zero() || self.issuer.refresh_token_ttl.is_zero() {
            return Err(TokenError::config("token TTLs must be greater than 0"));
        }
        if self.keys.signing_lifetime.is_zero() {
            return Err(TokenError::config("SIGNING_KEY_LIFETIME must be greater than 0"));
        }
        if self.keys.rsa_bits < 2048 {
            return Err(TokenError::config("RSA_KEY_BITS must be at least 2048"));
        }
        if self.issuer.access_audience == self.issuer.refresh_audience {
            return Err(TokenError::config(
                "access and refresh audiences must differ",
            ));
        }
        let needs_postgres = self.key_store == KeyStoreBackend::Postgres
            || self.revocation_store == RevocationStoreBackend::Postgres;
        if needs_postgres && self.database_url.is_none() {
            return Err(TokenError::config("DATABASE_URL is required for postgres stores"));
        }
        if self.revocation_store == RevocationStoreBackend::Redis && self.redis_url.is_none() {
            return Err(TokenError::config("REDIS_URL is required for the redis store"));
        }
        Ok(())
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, TokenError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
