//! Prometheus metrics for Token Service.

// Metric names are static; registration only fails on a duplicate name.
#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder};

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_service_tokens_issued_total",
        "Total number of tokens issued",
        &["token_type", "algorithm"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Tokens refreshed counter.
pub static TOKENS_REFRESHED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_service_tokens_refreshed_total",
        "Total number of refresh exchanges",
        &["status"]
    )
    .expect("Failed to register tokens_refreshed metric")
});

/// Tokens revoked counter.
pub static TOKENS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_service_tokens_revoked_total",
        "Total number of tokens revoked",
        &["reason"]
    )
    .expect("Failed to register tokens_revoked metric")
});

/// Signing key rotations counter.
pub static KEY_ROTATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_service_key_rotations_total",
        "Total number of signing key rotations",
        &["status"]
    )
    .expect("Failed to register key_rotations metric")
});

/// Store operation latency histogram.
pub static STORE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "token_service_store_latency_seconds",
        "Key and revocation store latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register store_latency metric")
});

/// Render every registered metric in the text exposition format.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
