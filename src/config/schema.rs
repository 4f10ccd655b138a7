//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the aggregator.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::upstream::descriptor::ShapeRule;

/// Root configuration for the aggregator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AggregatorConfig {
    /// HTTP surface settings.
    pub server: ServerConfig,

    /// Upstream services to aggregate, in response order.
    pub upstreams: UpstreamList,

    /// Outbound HTTP client settings.
    pub http_client: HttpClientConfig,

    /// Per-upstream circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Aggregation defaults.
    pub aggregation: AggregationConfig,

    /// Offload worker pool.
    pub offload: OffloadConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Whole-request timeout for inbound requests in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Upstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Unique upstream identifier, also the rate-limit class prefix (`class-suffix`).
    pub name: String,

    /// Absolute URL fetched with GET.
    pub url: String,

    /// How the JSON body is reshaped before caching.
    #[serde(default)]
    pub shape: ShapeRule,

    /// Cache TTL override in milliseconds.
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,
}

impl UpstreamConfig {
    fn demo(name: &str, url: &str, shape: ShapeRule) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            shape,
            cache_ttl_ms: None,
        }
    }
}

/// Ordered list of upstreams; defaults to the ten demo sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UpstreamList(pub Vec<UpstreamConfig>);

impl Default for UpstreamList {
    fn default() -> Self {
        let take = |into: &str, limit: usize| ShapeRule::Take {
            into: into.to_string(),
            from: None,
            limit,
        };
        let field = |into: &str, pointer: &str| ShapeRule::Field {
            into: into.to_string(),
            pointer: pointer.to_string(),
        };
        let jp = "https://jsonplaceholder.typicode.com";

        Self(vec![
            UpstreamConfig::demo("jsonplaceholder-users", &format!("{jp}/users"), take("users", 3)),
            UpstreamConfig::demo("jsonplaceholder-posts", &format!("{jp}/posts"), take("posts", 5)),
            UpstreamConfig::demo("jsonplaceholder-comments", &format!("{jp}/comments"), take("comments", 5)),
            UpstreamConfig::demo("jsonplaceholder-albums", &format!("{jp}/albums"), take("albums", 3)),
            UpstreamConfig::demo("jsonplaceholder-photos", &format!("{jp}/photos"), take("photos", 3)),
            UpstreamConfig::demo("jsonplaceholder-todos", &format!("{jp}/todos"), take("todos", 5)),
            UpstreamConfig::demo("cat-facts", "https://catfact.ninja/fact", field("catFact", "/fact")),
            UpstreamConfig::demo("dog-facts", "https://dogapi.dog/api/v2/facts", field("dogFacts", "/data")),
            UpstreamConfig::demo("random-user", "https://randomuser.me/api/", field("randomUser", "/results/0")),
            UpstreamConfig::demo(
                "activity-api",
                "https://pokeapi.co/api/v2/pokemon/pikachu",
                field("activity", "/name"),
            ),
        ])
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// How long pooled keep-alive connections stay idle, in seconds.
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle pooled connections per host.
    pub pool_max_idle_per_host: usize,

    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 4000,
            pool_idle_timeout_secs: 30,
            pool_max_idle_per_host: 10,
            user_agent: concat!("api-aggregator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Circuit breaker configuration, applied to every upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Time spent open before a probe is allowed, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown_ms: 60_000,
        }
    }
}

/// Limits for one upstream class.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ClassLimit {
    /// Token refill rate.
    pub requests_per_second: f64,

    /// Maximum concurrent in-flight requests for the class.
    pub concurrency: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Limits for names whose class prefix is not listed in `classes`.
    pub default: ClassLimit,

    /// Named classes, keyed by the name prefix before the first '-'.
    pub classes: BTreeMap<String, ClassLimit>,

    /// Bucket capacity as a multiple of the refill rate (burst allowance).
    pub burst_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limit = |requests_per_second: f64, concurrency: usize| ClassLimit {
            requests_per_second,
            concurrency,
        };
        let mut classes = BTreeMap::new();
        classes.insert("jsonplaceholder".to_string(), limit(10.0, 5));
        classes.insert("cat".to_string(), limit(5.0, 2));
        classes.insert("dog".to_string(), limit(5.0, 2));
        classes.insert("random".to_string(), limit(10.0, 3));
        classes.insert("activity".to_string(), limit(10.0, 3));

        Self {
            default: limit(10.0, 5),
            classes,
            burst_multiplier: 2.0,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,

    /// TTL used when an upstream has no override, in milliseconds.
    pub default_ttl_ms: u64,

    /// Interval of the expired-entry sweep, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_ms: 60_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor per attempt.
    pub factor: f64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Replace each delay by a uniform sample of `[0, delay]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            factor: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

/// Aggregation defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Strategy used when a request does not name one.
    pub default_strategy: String,

    /// Per-upstream fan-out timeout in milliseconds.
    pub default_timeout_ms: u64,

    /// How long the cached-fallback strategy keeps a slot's last success, in milliseconds.
    pub fallback_ttl_ms: u64,

    /// Send successful batches through the offload pool.
    pub offload_enabled: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_strategy: "best-effort".to_string(),
            default_timeout_ms: 5000,
            fallback_ttl_ms: 300_000,
            offload_enabled: true,
        }
    }
}

/// Offload worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
