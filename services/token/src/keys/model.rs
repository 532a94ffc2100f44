use crate::config::JwtAlgorithm;
use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::Zeroizing;

/// A persisted asymmetric signing key.
///
/// The private half is zeroed on drop and never printed.
#[derive(Clone)]
pub struct SigningKey {
    /// Opaque id carried in the `kid` header of tokens it signs
    pub key_id: String,
    /// Signature scheme
    pub algorithm: JwtAlgorithm,
    /// PKCS#1 PEM private key
    pub private_pem: Zeroizing<String>,
    /// SPKI PEM public key
    pub public_pem: String,
    /// When the key was generated
    pub created_at: DateTime<Utc>,
    /// End of the signing window. Verification continues after it.
    pub expires_at: DateTime<Utc>,
}

impl SigningKey {
    /// Past its signing lifetime; a successor should be rotated in.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("private_pem", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
