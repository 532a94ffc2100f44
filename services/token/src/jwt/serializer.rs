use crate::error::TokenError;
use crate::jwt::claims::Claims;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

/// Compact `header.payload.signature` encoding of a claim set.
pub struct JwtSerializer {
    algorithm: Algorithm,
}

impl JwtSerializer {
    /// Serializer signing and verifying with `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        JwtSerializer { algorithm }
    }

    /// Sign `claims`, embedding `key_id` and `typ: JWT` in the header.
    pub fn serialize(&self, claims: &Claims, key: &EncodingKey, key_id: &str) -> Result<String, TokenError> {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(key_id.to_string());
        header.typ = Some("JWT".to_string());

        encode(&header, claims, key).map_err(|e| TokenError::JwtEncoding(e.to_string()))
    }

    /// Read the header without verifying anything.
    pub fn header(&self, token: &str) -> Result<Header, TokenError> {
        let header = decode_header(token)?;
        if header.alg != self.algorithm {
            return Err(TokenError::JwtDecoding(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        Ok(header)
    }

    /// Verify the signature only. Time-based claims are left to the caller,
    /// which applies its own clock and skew tolerance.
    pub fn verify_signature(&self, token: &str, key: &DecodingKey) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(token, key, &validation)?;
        Ok(token_data.claims)
    }
}
