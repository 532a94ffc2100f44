//! Remote validator configuration.
//!
//! Loaded from the environment and validated before the key-set cache is
//! built.

use jsonwebtoken::Algorithm;
use rust_common::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Audience required when none is configured.
pub const DEFAULT_AUDIENCE: &str = "access";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Variable name
        field: String,
        /// Parser message
        reason: String,
    },

    /// A duration that must be positive was zero
    #[error("Invalid {0}: must be greater than 0")]
    ZeroDuration(&'static str),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },
}

/// What to do with a cached key set whose refresh interval has passed and
/// whose refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Fail validation until a refresh succeeds.
    Reject,
    /// Keep validating against the last good key set.
    ServeStale,
}

impl FromStr for StalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "serve-stale" | "serve_stale" => Ok(Self::ServeStale),
            other => Err(format!("unknown stale policy '{other}'")),
        }
    }
}

/// Remote validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Key-set document URL
    pub jwks_url: Url,
    /// Age after which the cached key set is refreshed
    pub refresh_interval: Duration,
    /// Per-attempt fetch timeout
    pub fetch_timeout: Duration,
    /// Retries after the first failed fetch
    pub fetch_max_retries: u32,
    /// Delay before the first retry; doubles per attempt
    pub fetch_initial_backoff: Duration,
    /// Behaviour when a refresh of an expired key set fails
    pub stale_policy: StalePolicy,
    /// Minimum gap between refreshes forced by an unknown `kid`
    pub forced_refresh_min_interval: Duration,
    /// Tolerance applied to `exp`, `iat` and `nbf`
    pub clock_skew: Duration,
    /// Only algorithm accepted in token headers
    pub algorithm: Algorithm,
    /// Required `iss`, if set
    pub expected_issuer: Option<String>,
    /// Required `aud` member; `access` unless configured otherwise
    pub expected_audience: Option<String>,
}

impl ValidatorConfig {
    /// Defaults for the given key-set URL.
    #[must_use]
    pub fn new(jwks_url: Url) -> Self {
        Self {
            jwks_url,
            refresh_interval: Duration::from_secs(900),
            fetch_timeout: Duration::from_secs(10),
            fetch_max_retries: 3,
            fetch_initial_backoff: Duration::from_millis(200),
            stale_policy: StalePolicy::Reject,
            forced_refresh_min_interval: Duration::from_secs(10),
            clock_skew: Duration::from_secs(60),
            algorithm: Algorithm::RS256,
            expected_issuer: None,
            expected_audience: Some(DEFAULT_AUDIENCE.to_string()),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::new(parse_url_env(
            "JWKS_URL",
            "http://localhost:8080/.well-known/jwks.json",
        )?);

        let config = Self {
            refresh_interval: Duration::from_secs(parse_env(
                "JWKS_REFRESH_INTERVAL",
                defaults.refresh_interval.as_secs(),
            )?),
            fetch_timeout: Duration::from_secs(parse_env(
                "JWKS_FETCH_TIMEOUT",
                defaults.fetch_timeout.as_secs(),
            )?),
            fetch_max_retries: parse_env("JWKS_FETCH_MAX_RETRIES", defaults.fetch_max_retries)?,
            fetch_initial_backoff: Duration::from_millis(parse_env(
                "JWKS_FETCH_INITIAL_BACKOFF_MS",
                200,
            )?),
            stale_policy: parse_env("JWKS_STALE_POLICY", defaults.stale_policy)?,
            forced_refresh_min_interval: Duration::from_millis(parse_env(
                "JWKS_FORCED_REFRESH_MIN_INTERVAL_MS",
                10_000,
            )?),
            clock_skew: Duration::from_secs(parse_env("CLOCK_SKEW", defaults.clock_skew.as_secs())?),
            algorithm: parse_env("JWT_ALGORITHM", defaults.algorithm)?,
            expected_issuer: env::var("EXPECTED_ISSUER").ok().filter(|s| !s.is_empty()),
            // Set but empty disables the audience check.
            expected_audience: match env::var("EXPECTED_AUDIENCE") {
                Ok(audience) if audience.is_empty() => None,
                Ok(audience) => Some(audience),
                Err(_) => defaults.expected_audience.clone(),
            },
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("JWKS_REFRESH_INTERVAL"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("JWKS_FETCH_TIMEOUT"));
        }
        Ok(())
    }

    /// Sets the key-set refresh interval.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets fetch retries and the first backoff delay.
    #[must_use]
    pub fn with_fetch_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.fetch_max_retries = max_retries;
        self.fetch_initial_backoff = initial_backoff;
        self
    }

    /// Sets the per-attempt fetch timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the stale key-set policy.
    #[must_use]
    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Sets the minimum gap between unknown-`kid` refreshes.
    #[must_use]
    pub fn with_forced_refresh_min_interval(mut self, interval: Duration) -> Self {
        self.forced_refresh_min_interval = interval;
        self
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Requires `iss` to equal `issuer`.
    #[must_use]
    pub fn with_expected_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Requires `aud` to contain `audience`.
    #[must_use]
    pub fn with_expected_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Accept tokens regardless of `aud`.
    #[must_use]
    pub fn without_expected_audience(mut self) -> Self {
        self.expected_audience = None;
        self
    }

    /// Backoff policy for key-set fetches.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(self.fetch_max_retries)
            .with_initial_delay(self.fetch_initial_backoff)
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_url_env(name: &str, default: &str) -> Result<Url, ConfigError> {
    let url_str = env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&url_str).map_err(|e| ConfigError::InvalidUrl {
        field: name.to_string(),
        reason: e.to_string(),
    })
}
