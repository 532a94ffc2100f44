//! Auth Edge - remote validation of tokens issued by the token service.
//!
//! Verification keys come from the token service's published key set,
//! cached for a bounded interval and refreshed on demand when a token
//! names a key the cache has not seen. [`AuthLayer`] puts the validator
//! in front of an HTTP service.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod middleware;

pub use config::{ConfigError, StalePolicy, ValidatorConfig};
pub use error::ValidationError;
pub use jwt::{extract_bearer, Claims, JwkCache, JwtValidator};
pub use metrics::ValidatorMetrics;
pub use middleware::{AuthLayer, AuthService, AuthenticatedSubject};
