//! Remote token validation against the cached key set.

use crate::config::ValidatorConfig;
use crate::error::ValidationError;
use crate::jwt::claims::Claims;
use crate::jwt::jwk_cache::JwkCache;
use crate::jwt::token::{ClaimRules, Token, Validated};
use crate::metrics::ValidatorMetrics;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Validates tokens issued by the token service.
pub struct JwtValidator {
    jwk_cache: Arc<JwkCache>,
    config: ValidatorConfig,
    metrics: ValidatorMetrics,
}

impl JwtValidator {
    /// Creates a validator backed by `jwk_cache`.
    pub fn new(jwk_cache: Arc<JwkCache>, config: ValidatorConfig, metrics: ValidatorMetrics) -> Self {
        Self {
            jwk_cache,
            config,
            metrics,
        }
    }

    /// Validates `raw_token` at the current time and returns its claims.
    pub async fn validate(&self, raw_token: &str) -> Result<Claims, ValidationError> {
        self.validate_at(raw_token, Utc::now().timestamp()).await
    }

    /// Validates `raw_token` as if the clock read `now` (unix seconds).
    pub async fn validate_at(&self, raw_token: &str, now: i64) -> Result<Claims, ValidationError> {
        self.validate_token(raw_token, now)
            .await
            .map(Token::into_claims)
    }

    /// Validates `raw_token` at `now` and keeps the typed token.
    ///
    /// Steps, in order: header and algorithm, key lookup (which may force
    /// one key-set refresh), signature, then `exp`/`iat`/`nbf` with the
    /// configured skew and the optional issuer and audience.
    pub async fn validate_token(
        &self,
        raw_token: &str,
        now: i64,
    ) -> Result<Token<Validated>, ValidationError> {
        let result = self.run_checks(raw_token, now).await;
        match &result {
            Ok(token) => {
                self.metrics.record_validation("ok");
                debug!(sub = %token.subject(), kid = ?token.kid(), "Token validated");
            }
            Err(e) => {
                self.metrics.record_validation(e.code());
                debug!(code = e.code(), error = %e, "Token rejected");
            }
        }
        result
    }

    async fn run_checks(&self, raw_token: &str, now: i64) -> Result<Token<Validated>, ValidationError> {
        let token = Token::parse(raw_token)?;
        token.require_algorithm(self.config.algorithm)?;

        let kid = token.kid().ok_or(ValidationError::MissingKeyId)?;
        let key = self.jwk_cache.get_key(kid).await?;

        let rules = ClaimRules {
            leeway: i64::try_from(self.config.clock_skew.as_secs()).unwrap_or(i64::MAX),
            issuer: self.config.expected_issuer.as_deref(),
            audience: self.config.expected_audience.as_deref(),
        };

        token.verify_signature(&key)?.validate_claims(rules, now)
    }

    /// The key-set cache in use.
    pub fn jwk_cache(&self) -> &Arc<JwkCache> {
        &self.jwk_cache
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn extract_bearer(header: &str) -> Result<&str, ValidationError> {
    let header = header.trim();
    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| ValidationError::malformed("expected Bearer scheme"))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ValidationError::malformed("expected Bearer scheme"));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(ValidationError::malformed("empty bearer token"));
    }
    Ok(token)
}
