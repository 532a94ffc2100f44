use crate::error::TokenError;
use crate::jwt::claims::Claims;
use std::time::Duration;

/// Assembles [`Claims`], checking the fields every token must carry.
pub struct JwtBuilder {
    issuer: String,
    subject: Option<String>,
    audience: Vec<String>,
    ttl: Duration,
    jti: Option<String>,
    issued_at: Option<i64>,
}

impl JwtBuilder {
    /// Start a claim set for `issuer` with a 15 minute lifetime.
    pub fn new(issuer: impl Into<String>) -> Self {
        JwtBuilder {
            issuer: issuer.into(),
            subject: None,
            audience: Vec::new(),
            ttl: Duration::from_secs(900), // 15 minutes default
            jti: None,
            issued_at: None,
        }
    }

    /// Required.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Add an audience; at least one is required.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience.push(audience.into());
        self
    }

    /// Lifetime measured from `iat`.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Token id; an empty id is dropped.
    pub fn jti(mut self, jti: Option<String>) -> Self {
        self.jti = jti;
        self
    }

    /// Pin `iat`; defaults to the current time.
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.issued_at = Some(timestamp);
        self
    }

    /// Fails when subject or audience is missing, or the lifetime is zero or
    /// pushes `exp` past the representable range.
    pub fn build(self) -> Result<Claims, TokenError> {
        let subject = self
            .subject
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TokenError::JwtEncoding("subject is required".to_string()))?;
        if self.audience.is_empty() {
            return Err(TokenError::JwtEncoding("audience is required".to_string()));
        }
        let ttl = i64::try_from(self.ttl.as_secs())
            .ok()
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| TokenError::JwtEncoding("ttl must be positive".to_string()))?;

        let issued_at = self
            .issued_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        if issued_at.checked_add(ttl).is_none() {
            return Err(TokenError::JwtEncoding("ttl overflows expiry".to_string()));
        }

        let mut claims = Claims::new(self.issuer, subject, self.audience, issued_at, ttl);
        if let Some(jti) = self.jti.filter(|j| !j.is_empty()) {
            claims = claims.with_jti(jti);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_basic() {
        let claims = JwtBuilder::new("issuer")
            .subject("user-123")
            .audience("access")
            .ttl(Duration::from_secs(3600))
            .issued_at(10)
            .build()
            .unwrap();

        assert_eq!(claims.iss, "issuer");
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.aud, vec!["access".to_string()]);
        assert_eq!(claims.exp, 3610);
    }

    #[test]
    fn test_builder_missing_subject() {
        let result = JwtBuilder::new("issuer").audience("access").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_ttl() {
        let result = JwtBuilder::new("issuer")
            .subject("user-1")
            .audience("access")
            .ttl(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_ttl_overflowing_expiry() {
        let result = JwtBuilder::new("issuer")
            .subject("user-1")
            .audience("access")
            .ttl(Duration::from_secs(i64::MAX as u64))
            .issued_at(1_700_000_000)
            .build();
        assert!(matches!(result, Err(TokenError::JwtEncoding(_))));

        let result = JwtBuilder::new("issuer")
            .subject("user-1")
            .audience("access")
            .ttl(Duration::from_secs(u64::MAX))
            .build();
        assert!(matches!(result, Err(TokenError::JwtEncoding(_))));
    }

    #[test]
    fn test_builder_ignores_empty_jti() {
        let claims = JwtBuilder::new("issuer")
            .subject("user-1")
            .audience("refresh")
            .jti(Some(String::new()))
            .build()
            .unwrap();
        assert!(claims.jti.is_none());
    }
}
