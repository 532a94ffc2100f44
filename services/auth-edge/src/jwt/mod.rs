//! Token parsing, key-set caching and validation.

pub mod claims;
pub mod jwk_cache;
pub mod token;
pub mod validator;

pub use claims::Claims;
pub use jwk_cache::{CachedKey, JwkCache, Jwk, Jwks};
pub use token::{ClaimRules, SignatureValidated, Token, TokenState, Unvalidated, Validated};
pub use validator::{extract_bearer, JwtValidator};
