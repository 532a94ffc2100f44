//! Shared library for cross-cutting concerns in auth-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - HTTP client configuration and building
//! - Retry policies with exponential backoff
//! - Deadlines for blocking I/O issued from request context
//! - Tracing subscriber initialisation
//! - Shutdown signalling for background loops

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod deadline;
pub mod error;
pub mod http;
pub mod retry;
pub mod shutdown;
pub mod tracing_config;

pub use deadline::with_deadline;
pub use error::PlatformError;
pub use http::{build_http_client, HttpConfig};
pub use retry::{RetryConfig, RetryPolicy};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use tracing_config::{init_tracing, TracingConfig};
