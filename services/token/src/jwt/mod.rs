//! JWT claim set, builder and compact serialization.

pub mod builder;
pub mod claims;
pub mod serializer;

pub use builder::JwtBuilder;
pub use claims::Claims;
pub use serializer::JwtSerializer;
