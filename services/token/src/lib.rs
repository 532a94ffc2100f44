//! Token Service library.
//!
//! Owns the signing-key lifecycle (generation, persistence, rotation),
//! issues access and refresh tokens, tracks refresh tokens for revocation
//! and publishes the public key set for remote validators.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod http;
pub mod issuer;
pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod metrics;
pub mod refresh;
pub mod storage;

// Re-exports for convenience
pub use config::Config;
pub use error::TokenError;
pub use issuer::{Issuer, TokenPair};
pub use keys::KeyManager;
