use crate::config::JwtAlgorithm;
use crate::error::TokenError;
use crate::keys::KeyManager;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::DecodingKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// RSA public key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Always `RSA`
    pub kty: String,
    /// Key ID
    pub kid: String,
    /// Always `sig`
    #[serde(rename = "use")]
    pub key_use: String,
    /// Signing algorithm
    pub alg: String,
    /// Modulus, base64url
    pub n: String,
    /// Exponent, base64url
    pub e: String,
}

impl Jwk {
    /// Project an SPKI PEM public key into JWK form.
    pub fn from_public_pem(key_id: &str, algorithm: JwtAlgorithm, pem: &str) -> Result<Self, TokenError> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| TokenError::KeyEncoding(e.to_string()))?;

        Ok(Jwk {
            kty: "RSA".to_string(),
            kid: key_id.to_string(),
            key_use: "sig".to_string(),
            alg: algorithm.as_str().to_string(),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        })
    }

    /// Verification key built from the modulus and exponent.
    pub fn decoding_key(&self) -> Result<DecodingKey, TokenError> {
        DecodingKey::from_rsa_components(&self.n, &self.e)
            .map_err(|e| TokenError::KeyEncoding(e.to_string()))
    }
}

/// Key set document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    /// Published keys
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Empty set.
    pub fn new() -> Self {
        Jwks { keys: Vec::new() }
    }

    /// Append `key`.
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// Key with id `key_id`.
    pub fn find(&self, key_id: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == key_id)
    }

    /// Serialized document.
    pub fn to_json(&self) -> Result<String, TokenError> {
        serde_json::to_string(self).map_err(|e| TokenError::Internal(e.to_string()))
    }
}

/// Serves the key manager's current verification keys. Holds no state of
/// its own, so the published set always matches what the manager signs
/// and verifies with.
#[derive(Clone)]
pub struct JwksPublisher {
    keys: Arc<KeyManager>,
}

impl JwksPublisher {
    /// Publisher for `keys`.
    pub fn new(keys: Arc<KeyManager>) -> Self {
        JwksPublisher { keys }
    }

    /// Active key plus every retired key still inside its window.
    pub fn get_jwks(&self) -> Jwks {
        self.keys.public_key_set()
    }

    /// Id of the key new tokens are signed with.
    pub fn current_key_id(&self) -> String {
        self.keys.active_key_id()
    }
}
