//! Refresh-token identifiers and their revocation records.

pub mod generator;
pub mod record;

pub use generator::RefreshTokenGenerator;
pub use record::RevocationRecord;
