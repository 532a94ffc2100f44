//! Type-state token: claims are only reachable once the signature and
//! the time and audience checks have passed.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Header, Validation};

use crate::error::ValidationError;
use crate::jwt::claims::Claims;
use crate::jwt::jwk_cache::CachedKey;

mod private {
    pub trait Sealed {}
}

/// Marker trait for token validation states.
pub trait TokenState: private::Sealed {
    /// State name for logs.
    fn state_name() -> &'static str;
}

/// Header parsed, nothing verified.
pub struct Unvalidated;
impl private::Sealed for Unvalidated {}
impl TokenState for Unvalidated {
    fn state_name() -> &'static str {
        "Unvalidated"
    }
}

/// Signature verified, claims not yet checked.
pub struct SignatureValidated {
    claims: Claims,
}
impl private::Sealed for SignatureValidated {}
impl TokenState for SignatureValidated {
    fn state_name() -> &'static str {
        "SignatureValidated"
    }
}

/// Signature and claims verified.
pub struct Validated {
    claims: Claims,
}
impl private::Sealed for Validated {}
impl TokenState for Validated {
    fn state_name() -> &'static str {
        "Validated"
    }
}

/// Claim checks applied after the signature.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRules<'a> {
    /// Tolerance in seconds for `exp`, `iat` and `nbf`.
    pub leeway: i64,
    /// Required `iss`, if any.
    pub issuer: Option<&'a str>,
    /// Required member of `aud`, if any.
    pub audience: Option<&'a str>,
}

/// JWT moving through validation states.
pub struct Token<State: TokenState> {
    raw: String,
    header: Header,
    state: State,
}

impl Token<Unvalidated> {
    /// Parse the header of a compact JWS.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.split('.').count() != 3 {
            return Err(ValidationError::malformed("expected three segments"));
        }
        let header = decode_header(raw)
            .map_err(|e| ValidationError::malformed(format!("invalid header: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            state: Unvalidated,
        })
    }

    /// Key id from the header.
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Algorithm from the header.
    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Reject tokens whose header algorithm is not the configured one.
    pub fn require_algorithm(&self, expected: Algorithm) -> Result<(), ValidationError> {
        if self.header.alg == expected {
            Ok(())
        } else {
            Err(ValidationError::AlgorithmMismatch {
                expected: format!("{expected:?}"),
                found: format!("{:?}", self.header.alg),
            })
        }
    }

    /// Verify the signature with `key`. Time claims are left to
    /// [`Token::validate_claims`] so they can be checked against an
    /// explicit clock.
    pub fn verify_signature(
        self,
        key: &CachedKey,
    ) -> Result<Token<SignatureValidated>, ValidationError> {
        if let Some(key_alg) = key.algorithm {
            if key_alg != self.header.alg {
                return Err(ValidationError::AlgorithmMismatch {
                    expected: format!("{key_alg:?}"),
                    found: format!("{:?}", self.header.alg),
                });
            }
        }

        let mut validation = Validation::new(self.header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(&self.raw, &key.key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => ValidationError::InvalidSignature,
            _ => ValidationError::malformed(e.to_string()),
        })?;

        Ok(Token {
            raw: self.raw,
            header: self.header,
            state: SignatureValidated {
                claims: data.claims,
            },
        })
    }
}

impl Token<SignatureValidated> {
    /// Check time, issuer and audience claims at `now` (unix seconds).
    pub fn validate_claims(
        self,
        rules: ClaimRules<'_>,
        now: i64,
    ) -> Result<Token<Validated>, ValidationError> {
        let claims = &self.state.claims;

        if claims.is_expired_at(now, rules.leeway) {
            return Err(ValidationError::Expired {
                expired_at: timestamp(claims.exp),
            });
        }
        if claims.is_issued_in_future(now, rules.leeway) {
            return Err(ValidationError::IssuedInFuture {
                issued_at: timestamp(claims.iat),
            });
        }
        if claims.is_not_yet_valid(now, rules.leeway) {
            return Err(ValidationError::NotYetValid {
                valid_from: timestamp(claims.nbf.unwrap_or(claims.iat)),
            });
        }
        if let Some(issuer) = rules.issuer {
            if claims.iss != issuer {
                return Err(ValidationError::IssuerMismatch {
                    expected: issuer.to_string(),
                    found: claims.iss.clone(),
                });
            }
        }
        if let Some(audience) = rules.audience {
            if !claims.has_audience(audience) {
                return Err(ValidationError::AudienceMismatch {
                    expected: audience.to_string(),
                    found: claims.aud.clone(),
                });
            }
        }

        Ok(Token {
            raw: self.raw,
            header: self.header,
            state: Validated {
                claims: self.state.claims,
            },
        })
    }

    /// Claims whose signature verified but which are not yet checked.
    pub fn peek_claims(&self) -> &Claims {
        &self.state.claims
    }
}

impl Token<Validated> {
    /// Validated claims.
    pub fn claims(&self) -> &Claims {
        &self.state.claims
    }

    /// Consume the token, keeping only the claims.
    pub fn into_claims(self) -> Claims {
        self.state.claims
    }

    /// Subject claim.
    pub fn subject(&self) -> &str {
        &self.state.claims.sub
    }

    /// Key id that signed the token.
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Raw token string.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl<S: TokenState> Token<S> {
    /// Current state name.
    pub fn state_name(&self) -> &'static str {
        S::state_name()
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, DecodingKey, EncodingKey};

    const SECRET: &[u8] = b"token-state-test-secret";
    const NOW: i64 = 1_700_000_000;

    fn claims() -> Claims {
        Claims {
            iss: "token-service".to_string(),
            sub: "user-1".to_string(),
            aud: vec!["access".to_string()],
            exp: NOW + 900,
            iat: NOW,
            nbf: None,
            jti: None,
        }
    }

    fn sign(claims: &Claims, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn key(secret: &[u8]) -> CachedKey {
        CachedKey {
            key: DecodingKey::from_secret(secret),
            algorithm: Some(Algorithm::HS256),
        }
    }

    fn rules() -> ClaimRules<'static> {
        ClaimRules {
            leeway: 60,
            issuer: None,
            audience: None,
        }
    }

    fn verified(claims: &Claims) -> Token<SignatureValidated> {
        Token::parse(&sign(claims, Some("k1")))
            .unwrap()
            .verify_signature(&key(SECRET))
            .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let token = Token::parse(&sign(&claims(), Some("k1"))).unwrap();
        assert_eq!(token.state_name(), "Unvalidated");
        assert_eq!(token.kid(), Some("k1"));

        let token = token.verify_signature(&key(SECRET)).unwrap();
        assert_eq!(token.state_name(), "SignatureValidated");

        let token = token.validate_claims(rules(), NOW).unwrap();
        assert_eq!(token.state_name(), "Validated");
        assert_eq!(token.subject(), "user-1");
    }

    #[test]
    fn test_garbage_is_malformed() {
        for raw in ["", "abc", "a.b", "a.b.c", "a.b.c.d"] {
            let err = Token::parse(raw).err().unwrap();
            assert!(matches!(err, ValidationError::Malformed { .. }), "{raw}");
        }
    }

    #[test]
    fn test_wrong_key_is_invalid_signature() {
        let token = Token::parse(&sign(&claims(), Some("k1"))).unwrap();
        let err = token.verify_signature(&key(b"another-secret")).err().unwrap();
        assert!(matches!(err, ValidationError::InvalidSignature));
    }

    #[test]
    fn test_key_algorithm_must_match_header() {
        let token = Token::parse(&sign(&claims(), Some("k1"))).unwrap();
        let key = CachedKey {
            key: DecodingKey::from_secret(SECRET),
            algorithm: Some(Algorithm::HS384),
        };
        let err = token.verify_signature(&key).err().unwrap();
        assert!(matches!(err, ValidationError::AlgorithmMismatch { .. }));
    }

    #[test]
    fn test_require_algorithm() {
        let token = Token::parse(&sign(&claims(), Some("k1"))).unwrap();
        assert!(token.require_algorithm(Algorithm::HS256).is_ok());
        assert!(token.require_algorithm(Algorithm::RS256).is_err());
    }

    #[test]
    fn test_expiry_honours_leeway() {
        let exp = claims().exp;
        assert!(verified(&claims()).validate_claims(rules(), exp + 59).is_ok());

        let err = verified(&claims())
            .validate_claims(rules(), exp + 60)
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::Expired { .. }));
    }

    #[test]
    fn test_future_iat_honours_leeway() {
        let mut c = claims();
        c.iat = NOW + 60;
        assert!(verified(&c).validate_claims(rules(), NOW).is_ok());

        c.iat = NOW + 61;
        let err = verified(&c).validate_claims(rules(), NOW).err().unwrap();
        assert!(matches!(err, ValidationError::IssuedInFuture { .. }));
    }

    #[test]
    fn test_nbf_honours_leeway() {
        let mut c = claims();
        c.nbf = Some(NOW + 120);
        let err = verified(&c).validate_claims(rules(), NOW).err().unwrap();
        assert!(matches!(err, ValidationError::NotYetValid { .. }));
        assert!(verified(&c).validate_claims(rules(), NOW + 60).is_ok());
    }

    #[test]
    fn test_issuer_and_audience_rules() {
        let strict = ClaimRules {
            leeway: 60,
            issuer: Some("token-service"),
            audience: Some("access"),
        };
        assert!(verified(&claims()).validate_claims(strict, NOW).is_ok());

        let wrong_issuer = ClaimRules {
            issuer: Some("someone-else"),
            ..strict
        };
        let err = verified(&claims())
            .validate_claims(wrong_issuer, NOW)
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::IssuerMismatch { .. }));

        let wrong_audience = ClaimRules {
            audience: Some("refresh"),
            ..strict
        };
        let err = verified(&claims())
            .validate_claims(wrong_audience, NOW)
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::AudienceMismatch { .. }));
    }
}
