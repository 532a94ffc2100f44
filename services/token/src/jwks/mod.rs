//! Public key set published at `/.well-known/jwks.json`.

pub mod publisher;

pub use publisher::{Jwk, Jwks, JwksPublisher};
