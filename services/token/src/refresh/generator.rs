use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// Refresh token identifiers and their digests.
pub struct RefreshTokenGenerator;

impl RefreshTokenGenerator {
    /// Fresh unique token identifier (`jti`).
    pub fn generate_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// One-way digest used as the revocation record key. The raw `jti`
    /// never reaches a store.
    pub fn hash(jti: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(jti.as_bytes());
        let result = hasher.finalize();
        URL_SAFE_NO_PAD.encode(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = RefreshTokenGenerator::generate_jti();
        let id2 = RefreshTokenGenerator::generate_jti();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36);
    }

    #[test]
    fn test_hash_deterministic() {
        let hash1 = RefreshTokenGenerator::hash("r1");
        let hash2 = RefreshTokenGenerator::hash("r1");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 43); // Base64 encoded 32 bytes
    }

    #[test]
    fn test_hash_different_for_different_ids() {
        let hash1 = RefreshTokenGenerator::hash("r1");
        let hash2 = RefreshTokenGenerator::hash("r2");
        assert_ne!(hash1, hash2);
        assert_ne!(hash1, "r1");
    }
}
