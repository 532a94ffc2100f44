//! Signing key lifecycle: generation, the in-memory key ring and the
//! manager that rotates it.

pub mod generator;
pub mod manager;
pub mod model;
mod ring;

pub use generator::RsaKeyGenerator;
pub use manager::KeyManager;
pub use model::SigningKey;
