//! Turns an authenticated subject into signed tokens.
//!
//! Access tokens are stateless. Every refresh token is tracked by a
//! [`RevocationRecord`] written before the token leaves the issuer; a
//! refresh token whose record cannot be written is never returned.

use crate::config::IssuerPolicy;
use crate::error::TokenError;
use crate::jwt::{Claims, JwtBuilder};
use crate::keys::KeyManager;
use crate::metrics::{TOKENS_ISSUED, TOKENS_REFRESHED, TOKENS_REVOKED};
use crate::refresh::{RefreshTokenGenerator, RevocationRecord};
use crate::storage::{bounded, RevocationStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Access and refresh token handed to a client after login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    /// Token for the access audience
    pub access_token: String,
    /// Single-use token for the refresh audience
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: u64,
}

/// Signs tokens with the active key and tracks refresh tokens in a
/// [`RevocationStore`].
pub struct Issuer {
    keys: Arc<KeyManager>,
    revocations: Arc<dyn RevocationStore>,
    policy: IssuerPolicy,
}

impl Issuer {
    /// Issuer signing with `keys` and recording refresh tokens in `revocations`.
    pub fn new(keys: Arc<KeyManager>, revocations: Arc<dyn RevocationStore>, policy: IssuerPolicy) -> Self {
        Issuer {
            keys,
            revocations,
            policy,
        }
    }

    /// Key manager the issuer signs with.
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Signed token for `subject` with the given audience, lifetime and
    /// optional `jti`. Nothing is recorded for it.
    pub fn issue_token(
        &self,
        subject: &str,
        audience: &str,
        ttl: Duration,
        jti: Option<&str>,
    ) -> Result<String, TokenError> {
        let claims = JwtBuilder::new(&self.policy.issuer)
            .subject(subject)
            .audience(audience)
            .ttl(ttl)
            .jti(jti.map(str::to_string))
            .build()?;

        self.keys.sign(&claims)
    }

    /// Short-lived token for the access audience. Carries no `jti`.
    pub fn issue_access_token(&self, subject: &str) -> Result<String, TokenError> {
        let token = self.issue_token(
            subject,
            &self.policy.access_audience,
            self.policy.access_token_ttl,
            None,
        )?;
        self.count_issued("access");
        Ok(token)
    }

    /// Long-lived token for the refresh audience with a fresh `jti`.
    pub async fn issue_refresh_token(&self, subject: &str) -> Result<String, TokenError> {
        let jti = RefreshTokenGenerator::generate_jti();
        self.issue_refresh_token_with_id(subject, &jti).await
    }

    /// Refresh token with a caller-chosen `jti`. The revocation record is
    /// persisted before the token is returned.
    #[instrument(skip(self, jti))]
    pub async fn issue_refresh_token_with_id(&self, subject: &str, jti: &str) -> Result<String, TokenError> {
        if jti.trim().is_empty() {
            return Err(TokenError::RefreshInvalid("token id must not be blank".to_string()));
        }
        let now = Utc::now();
        let claims = JwtBuilder::new(&self.policy.issuer)
            .subject(subject)
            .audience(&self.policy.refresh_audience)
            .ttl(self.policy.refresh_token_ttl)
            .jti(Some(jti.to_string()))
            .issued_at(now.timestamp())
            .build()?;

        // Sign first: a record for a token that was never handed out is harmless.
        let token = self.keys.sign(&claims)?;

        let record = RevocationRecord::new(
            RefreshTokenGenerator::hash(jti),
            subject.to_string(),
            now,
            timestamp(claims.exp)?,
        );
        bounded(
            "revocations.save",
            "revocations",
            self.policy.store_timeout,
            self.revocations.save(&record),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Refresh token record not saved, token withheld");
            e
        })?;

        self.count_issued("refresh");
        Ok(token)
    }

    /// Access and refresh token for a freshly authenticated subject.
    pub async fn issue_pair(&self, subject: &str) -> Result<TokenPair, TokenError> {
        let access_token = self.issue_access_token(subject)?;
        let refresh_token = self.issue_refresh_token(subject).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.policy.access_token_ttl.as_secs(),
            refresh_expires_in: self.policy.refresh_token_ttl.as_secs(),
        })
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// revoked, so each refresh token works once.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let outcome = self.redeem(refresh_token).await;
        let status = match &outcome {
            Ok(_) => "success",
            Err(TokenError::RefreshRevoked) => "revoked",
            Err(TokenError::RefreshExpired) => "expired",
            Err(TokenError::RevocationUnavailable(_)) => "unavailable",
            Err(_) => "invalid",
        };
        TOKENS_REFRESHED.with_label_values(&[status]).inc();

        let subject = outcome?;
        self.issue_pair(&subject).await
    }

    /// Validate and consume a refresh token, returning its subject.
    async fn redeem(&self, refresh_token: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = self.verify_refresh_token(refresh_token, now)?;
        let jti = claims
            .jti
            .as_deref()
            .ok_or_else(|| TokenError::RefreshInvalid("missing jti".to_string()))?;
        let token_hash = RefreshTokenGenerator::hash(jti);

        let record = bounded(
            "revocations.find_by_hash",
            "revocations",
            self.policy.store_timeout,
            self.revocations.find_by_hash(&token_hash),
        )
        .await
        .map_err(fail_closed)?
        .ok_or_else(|| TokenError::RefreshInvalid("untracked refresh token".to_string()))?;

        if record.revoked {
            return Err(TokenError::RefreshRevoked);
        }
        if record.is_expired_at(now) {
            return Err(TokenError::RefreshExpired);
        }
        if record.subject != claims.sub {
            return Err(TokenError::RefreshInvalid("subject mismatch".to_string()));
        }

        let claimed = bounded(
            "revocations.update_revoked",
            "revocations",
            self.policy.store_timeout,
            self.revocations.revoke(&token_hash),
        )
        .await
        .map_err(fail_closed)?;

        // Another exchange of the same token won the race.
        if !claimed {
            return Err(TokenError::RefreshRevoked);
        }

        TOKENS_REVOKED.with_label_values(&["refresh"]).inc();
        Ok(claims.sub)
    }

    /// Check a refresh token's signature, audience, issuer and expiry.
    fn verify_refresh_token(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = self
            .keys
            .verify_signature(token)
            .map_err(|e| TokenError::RefreshInvalid(e.to_string()))?;

        if !claims.has_audience(&self.policy.refresh_audience) {
            return Err(TokenError::RefreshInvalid("not a refresh token".to_string()));
        }
        if claims.iss != self.policy.issuer {
            return Err(TokenError::RefreshInvalid("issuer mismatch".to_string()));
        }

        let leeway = i64::try_from(self.policy.clock_skew.as_secs()).unwrap_or(i64::MAX);
        if claims.is_expired_at(now.timestamp(), leeway) {
            return Err(TokenError::RefreshExpired);
        }
        if claims.is_issued_in_future(now.timestamp(), leeway) {
            return Err(TokenError::RefreshInvalid("issued in the future".to_string()));
        }

        Ok(claims)
    }

    /// Revoke the session behind a presented refresh token. An expired
    /// token can still be revoked.
    #[instrument(skip(self, refresh_token))]
    pub async fn revoke(&self, refresh_token: &str) -> Result<bool, TokenError> {
        let claims = self
            .keys
            .verify_signature(refresh_token)
            .map_err(|e| TokenError::RefreshInvalid(e.to_string()))?;
        if !claims.has_audience(&self.policy.refresh_audience) {
            return Err(TokenError::RefreshInvalid("not a refresh token".to_string()));
        }
        let jti = claims
            .jti
            .ok_or_else(|| TokenError::RefreshInvalid("missing jti".to_string()))?;

        self.revoke_by_id(&jti).await
    }

    /// Revoke by `jti`. Returns whether this call revoked the record.
    pub async fn revoke_by_id(&self, jti: &str) -> Result<bool, TokenError> {
        let revoked = bounded(
            "revocations.update_revoked",
            "revocations",
            self.policy.store_timeout,
            self.revocations.revoke(&RefreshTokenGenerator::hash(jti)),
        )
        .await?;

        if revoked {
            TOKENS_REVOKED.with_label_values(&["logout"]).inc();
            info!("Refresh token revoked");
        }
        Ok(revoked)
    }

    /// Whether the refresh token with `jti` is revoked. A store failure is
    /// reported as [`TokenError::RevocationUnavailable`], never as
    /// "not revoked".
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, TokenError> {
        bounded(
            "revocations.find_by_hash",
            "revocations",
            self.policy.store_timeout,
            self.revocations.is_revoked(&RefreshTokenGenerator::hash(jti)),
        )
        .await
        .map_err(fail_closed)
    }

    fn count_issued(&self, token_type: &str) {
        TOKENS_ISSUED
            .with_label_values(&[token_type, self.keys.algorithm().as_str()])
            .inc();
    }
}

fn fail_closed(err: TokenError) -> TokenError {
    warn!(error = %err, "Revocation state unavailable, rejecting token");
    TokenError::RevocationUnavailable(err.to_string())
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| TokenError::Internal(format!("timestamp out of range: {seconds}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyPolicy;
    use crate::storage::{InMemoryKeyStore, InMemoryRevocationStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Revocation store whose calls can be made to fail.
    #[derive(Default)]
    struct FlakyRevocationStore {
        inner: InMemoryRevocationStore,
        down: AtomicBool,
    }

    impl FlakyRevocationStore {
        fn check(&self) -> Result<(), TokenError> {
            if self.down.load(Ordering::SeqCst) {
                Err(TokenError::storage("revocations", "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RevocationStore for FlakyRevocationStore {
        async fn save(&self, record: &RevocationRecord) -> Result<(), TokenError> {
            self.check()?;
            self.inner.save(record).await
        }

        async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RevocationRecord>, TokenError> {
            self.check()?;
            self.inner.find_by_hash(token_hash).await
        }

        async fn update_revoked(&self, token_hash: &str) -> Result<bool, TokenError> {
            self.check()?;
            self.inner.update_revoked(token_hash).await
        }
    }

    async fn issuer_with(store: Arc<FlakyRevocationStore>) -> Issuer {
        let keys = KeyManager::initialize(Arc::new(InMemoryKeyStore::new()), KeyPolicy::default())
            .await
            .unwrap();
        Issuer::new(Arc::new(keys), store, IssuerPolicy::default())
    }

    fn claims_of(issuer: &Issuer, token: &str) -> Claims {
        issuer.key_manager().verify_signature(token).unwrap()
    }

    #[tokio::test]
    async fn test_access_token_claims() {
        let issuer = issuer_with(Arc::default()).await;
        let token = issuer.issue_access_token("user-1").unwrap();
        let claims = claims_of(&issuer, &token);

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.iss, "auth-service");
        assert_eq!(claims.aud, vec!["access".to_string()]);
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(claims.jti.is_none());
    }

    #[tokio::test]
    async fn test_issue_token_with_custom_lifetime() {
        let issuer = issuer_with(Arc::default()).await;
        let token = issuer
            .issue_token("svc-1", "internal", Duration::from_secs(120), Some("id-7"))
            .unwrap();
        let claims = claims_of(&issuer, &token);

        assert_eq!(claims.aud, vec!["internal".to_string()]);
        assert_eq!(claims.exp - claims.iat, 120);
        assert_eq!(claims.jti.as_deref(), Some("id-7"));
    }

    #[tokio::test]
    async fn test_issue_token_rejects_lifetime_past_representable_expiry() {
        let issuer = issuer_with(Arc::default()).await;
        let result = issuer.issue_token("u", "access", Duration::from_secs(i64::MAX as u64), None);
        assert!(matches!(result, Err(TokenError::JwtEncoding(_))));
    }

    #[tokio::test]
    async fn test_blank_refresh_token_id_rejected() {
        let store = Arc::new(FlakyRevocationStore::default());
        let issuer = issuer_with(store.clone()).await;

        for jti in ["", "   "] {
            let result = issuer.issue_refresh_token_with_id("user-1", jti).await;
            assert!(matches!(result, Err(TokenError::RefreshInvalid(_))));
            let record = store
                .find_by_hash(&RefreshTokenGenerator::hash(jti))
                .await
                .unwrap();
            assert!(record.is_none());
        }
    }

    #[tokio::test]
    async fn test_refresh_token_is_tracked() {
        let store = Arc::new(FlakyRevocationStore::default());
        let issuer = issuer_with(store.clone()).await;

        let token = issuer.issue_refresh_token("user-1").await.unwrap();
        let claims = claims_of(&issuer, &token);
        assert_eq!(claims.aud, vec!["refresh".to_string()]);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);

        let jti = claims.jti.unwrap();
        let record = store
            .find_by_hash(&RefreshTokenGenerator::hash(&jti))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.subject, "user-1");
        assert!(!record.revoked);
        assert_eq!(record.expires_at.timestamp(), claims.exp);
    }

    #[tokio::test]
    async fn test_refresh_token_withheld_when_record_write_fails() {
        let store = Arc::new(FlakyRevocationStore::default());
        let issuer = issuer_with(store.clone()).await;
        store.down.store(true, Ordering::SeqCst);

        let result = issuer.issue_refresh_token("user-1").await;
        assert!(matches!(result, Err(TokenError::Storage { .. })));
        assert!(issuer.issue_pair("user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_rejected() {
        let issuer = issuer_with(Arc::default()).await;
        let token = issuer.issue_refresh_token_with_id("user-1", "r1").await.unwrap();

        assert!(issuer.revoke_by_id("r1").await.unwrap());
        assert!(issuer.is_revoked("r1").await.unwrap());

        let result = issuer.refresh(&token).await;
        assert!(matches!(result, Err(TokenError::RefreshRevoked)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair_once() {
        let issuer = issuer_with(Arc::default()).await;
        let pair = issuer.issue_pair("user-1").await.unwrap();

        let next = issuer.refresh(&pair.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token, pair.refresh_token);
        assert_eq!(claims_of(&issuer, &next.access_token).sub, "user-1");

        let replay = issuer.refresh(&pair.refresh_token).await;
        assert!(matches!(replay, Err(TokenError::RefreshRevoked)));
        assert!(issuer.refresh(&next.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let issuer = issuer_with(Arc::default()).await;
        let access = issuer.issue_access_token("user-1").unwrap();

        assert!(matches!(
            issuer.refresh(&access).await,
            Err(TokenError::RefreshInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_fails_closed_when_store_down() {
        let store = Arc::new(FlakyRevocationStore::default());
        let issuer = issuer_with(store.clone()).await;
        let token = issuer.issue_refresh_token("user-1").await.unwrap();
        let jti = claims_of(&issuer, &token).jti.unwrap();

        store.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            issuer.refresh(&token).await,
            Err(TokenError::RevocationUnavailable(_))
        ));
        assert!(matches!(
            issuer.is_revoked(&jti).await,
            Err(TokenError::RevocationUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_untracked_refresh_token_rejected() {
        let store = Arc::new(FlakyRevocationStore::default());
        let issuer = issuer_with(store).await;

        // Signed by the right key but never recorded.
        let claims = JwtBuilder::new("auth-service")
            .subject("user-1")
            .audience("refresh")
            .jti(Some("ghost".to_string()))
            .build()
            .unwrap();
        let token = issuer.key_manager().sign(&claims).unwrap();

        assert!(matches!(
            issuer.refresh(&token).await,
            Err(TokenError::RefreshInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_presented_token() {
        let issuer = issuer_with(Arc::default()).await;
        let token = issuer.issue_refresh_token("user-1").await.unwrap();

        assert!(issuer.revoke(&token).await.unwrap());
        assert!(!issuer.revoke(&token).await.unwrap());
        assert!(matches!(
            issuer.refresh(&token).await,
            Err(TokenError::RefreshRevoked)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_survives_key_rotation() {
        let issuer = issuer_with(Arc::default()).await;
        let pair = issuer.issue_pair("user-1").await.unwrap();

        issuer.key_manager().rotate().await.unwrap();

        assert!(issuer.refresh(&pair.refresh_token).await.is_ok());
    }
}
