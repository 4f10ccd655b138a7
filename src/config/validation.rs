//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that upstream names are unique and URLs are usable
//! - Validate value ranges (thresholds > 0, rates > 0, delays ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AggregatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::aggregation::strategy::StrategyKind;
use crate::config::schema::{AggregatorConfig, ClassLimit};
use crate::rate_limit::limiter::DEFAULT_CLASS;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every violation.
pub fn validate_config(config: &AggregatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstreams.0.is_empty() {
        errors.push(ValidationError::new("upstreams", "at least one upstream is required"));
    }

    let mut seen = HashSet::new();
    for (i, upstream) in config.upstreams.0.iter().enumerate() {
        let field = format!("upstreams[{i}]");
        if upstream.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !seen.insert(upstream.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate upstream name '{}'", upstream.name),
            ));
        }

        match url::Url::parse(&upstream.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("{field}.url"),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(format!("{field}.url"), e.to_string())),
        }

        if upstream.cache_ttl_ms == Some(0) {
            errors.push(ValidationError::new(format!("{field}.cache_ttl_ms"), "must be > 0"));
        }
    }

    if config.http_client.request_timeout_ms == 0 {
        errors.push(ValidationError::new("http_client.request_timeout_ms", "must be > 0"));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be > 0"));
    }

    check_class(&mut errors, "rate_limit.default", &config.rate_limit.default);
    for (name, limit) in &config.rate_limit.classes {
        let field = format!("rate_limit.classes.{name}");
        if name == DEFAULT_CLASS {
            errors.push(ValidationError::new(
                field.clone(),
                "reserved for the fallback class, use rate_limit.default",
            ));
        }
        check_class(&mut errors, &field, limit);
    }
    if config.rate_limit.burst_multiplier < 1.0 {
        errors.push(ValidationError::new("rate_limit.burst_multiplier", "must be >= 1.0"));
    }

    if config.cache.max_size == 0 {
        errors.push(ValidationError::new("cache.max_size", "must be > 0"));
    }
    if config.cache.default_ttl_ms == 0 {
        errors.push(ValidationError::new("cache.default_ttl_ms", "must be > 0"));
    }
    if config.cache.sweep_interval_ms == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_ms", "must be > 0"));
    }

    let retries = &config.retries;
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if !(retries.factor >= 1.0) {
        errors.push(ValidationError::new("retries.factor", "must be >= 1.0"));
    }

    if config.aggregation.default_strategy.parse::<StrategyKind>().is_err() {
        errors.push(ValidationError::new(
            "aggregation.default_strategy",
            format!("unknown strategy '{}'", config.aggregation.default_strategy),
        ));
    }
    if config.aggregation.default_timeout_ms == 0 {
        errors.push(ValidationError::new("aggregation.default_timeout_ms", "must be > 0"));
    }

    if config.offload.workers == 0 {
        errors.push(ValidationError::new("offload.workers", "must be >= 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_class(errors: &mut Vec<ValidationError>, field: &str, limit: &ClassLimit) {
    if !(limit.requests_per_second > 0.0) {
        errors.push(ValidationError::new(
            format!("{field}.requests_per_second"),
            "must be > 0",
        ));
    }
    if limit.concurrency == 0 {
        errors.push(ValidationError::new(format!("{field}.concurrency"), "must be > 0"));
    }
}
