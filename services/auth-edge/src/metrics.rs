//! Validator metrics.
//!
//! Registered against a caller-supplied [`Registry`] so each validator
//! instance owns its collectors.

use prometheus::{CounterVec, IntGauge, Opts, Registry};

/// Validation outcome and key-set cache metrics.
#[derive(Clone)]
pub struct ValidatorMetrics {
    /// Validations by result code (`ok` or an `AUTH_*` code)
    pub validations: CounterVec,
    /// Key-set fetches by outcome
    pub key_set_fetches: CounterVec,
    /// Keys in the current cached set
    pub cached_keys: IntGauge,
}

impl ValidatorMetrics {
    /// Creates and registers the validator metrics.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let validations = CounterVec::new(
            Opts::new("token_validations_total", "Total token validations")
                .namespace("auth_edge"),
            &["result"],
        )?;
        registry.register(Box::new(validations.clone()))?;

        let key_set_fetches = CounterVec::new(
            Opts::new("key_set_fetches_total", "Total key-set fetches").namespace("auth_edge"),
            &["outcome"],
        )?;
        registry.register(Box::new(key_set_fetches.clone()))?;

        let cached_keys = IntGauge::with_opts(
            Opts::new("key_set_cached_keys", "Keys in the cached key set").namespace("auth_edge"),
        )?;
        registry.register(Box::new(cached_keys.clone()))?;

        Ok(Self {
            validations,
            key_set_fetches,
            cached_keys,
        })
    }

    /// Records a validation result.
    pub fn record_validation(&self, result: &str) {
        self.validations.with_label_values(&[result]).inc();
    }

    /// Records a key-set fetch outcome (`success`, `failure`, `stale`,
    /// `throttled`).
    pub fn record_fetch(&self, outcome: &str) {
        self.key_set_fetches.with_label_values(&[outcome]).inc();
    }
}
