//! Resilient client for a single upstream.
//!
//! Composes the circuit breaker, the shared response cache, the shared rate
//! limiter and the retrier around one [`UpstreamDescriptor`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::cache::key::cache_key;
use crate::cache::ResponseCache;
use crate::config::schema::HttpClientConfig;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::rate_limit::RateLimiter;
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::resilience::{BackoffRetrier, CircuitBreaker};
use crate::upstream::descriptor::UpstreamDescriptor;
use crate::upstream::types::{epoch_millis, UpstreamError, UpstreamResponse, UpstreamResult};

/// Build the pooled HTTP client shared by every upstream.
pub fn build_http_client(config: &HttpClientConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(config.user_agent.clone())
        .build()
}

/// Shared services an upstream client is built from.
#[derive(Clone)]
pub struct ClientDeps {
    pub cache: Arc<ResponseCache>,
    pub limiter: Arc<RateLimiter>,
    pub retrier: BackoffRetrier,
    pub http: reqwest::Client,
}

pub struct UpstreamClient {
    descriptor: UpstreamDescriptor,
    breaker: CircuitBreaker,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    retrier: BackoffRetrier,
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(descriptor: UpstreamDescriptor, breaker_config: &CircuitBreakerConfig, deps: ClientDeps) -> Self {
        let breaker = CircuitBreaker::new(descriptor.name.clone(), breaker_config);
        Self {
            descriptor,
            breaker,
            cache: deps.cache,
            limiter: deps.limiter,
            retrier: deps.retrier,
            http: deps.http,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_status(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Fetch through the circuit breaker, cache, rate limiter and retrier.
    ///
    /// With the circuit open, any cached payload (even expired) is served as
    /// stale; without one the call fails with [`UpstreamError::CircuitOpen`].
    pub async fn fetch(self: &Arc<Self>) -> UpstreamResult<UpstreamResponse> {
        let name = self.descriptor.name.clone();
        let params = json!({});

        if !self.breaker.can_execute() {
            let key = cache_key(&name, &params);
            return match self.cache.peek(&key) {
                Some(cached) => {
                    tracing::warn!(upstream = %name, "circuit open, serving cached payload");
                    Ok(UpstreamResponse {
                        source: name,
                        data: cached.payload,
                        timestamp: epoch_millis(),
                        from_cache: true,
                        cache_age: Some(cached.age.as_millis() as u64),
                        stale: true,
                    })
                }
                None => {
                    metrics::record_upstream_request(&name, "circuit_open");
                    Err(UpstreamError::CircuitOpen(name))
                }
            };
        }

        let client = Arc::clone(self);
        let fetcher = move || async move {
            let name = client.descriptor.name.as_str();
            client
                .limiter
                .execute(name, || client.retrier.execute(|| client.make_request(), name))
                .await
        };

        match self.cache.coalesce(&name, &params, self.descriptor.cache_ttl, fetcher).await {
            Ok(lookup) => {
                // stale-on-error still answers the caller
                self.breaker.record_success();
                Ok(UpstreamResponse {
                    source: name,
                    data: lookup.payload,
                    timestamp: epoch_millis(),
                    from_cache: lookup.from_cache,
                    cache_age: lookup.cache_age.map(|age| age.as_millis() as u64),
                    stale: lookup.stale,
                })
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(upstream = %name, error = %e, "upstream fetch failed");
                Err(e)
            }
        }
    }

    /// One GET with the per-request timeout; non-2xx and malformed bodies fail.
    async fn make_request(&self) -> UpstreamResult<Value> {
        let name = self.descriptor.name.as_str();
        let started = Instant::now();
        let result = self.send().await;
        metrics::record_upstream_duration(name, started.elapsed());

        let outcome = match &result {
            Ok(_) => "success",
            Err(UpstreamError::Timeout(_)) => "timeout",
            Err(UpstreamError::HttpStatus { .. }) => "http_error",
            Err(_) => "error",
        };
        metrics::record_upstream_request(name, outcome);
        result
    }

    async fn send(&self) -> UpstreamResult<Value> {
        tracing::debug!(upstream = %self.descriptor.name, url = %self.descriptor.url, "sending request");
        let response = self.http.get(self.descriptor.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        let body: Value =
            serde_json::from_slice(&bytes).map_err(|e| UpstreamError::InvalidBody(e.to_string()))?;
        self.descriptor.shape(body)
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("descriptor", &self.descriptor)
            .field("state", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RetryConfig};
    use crate::resilience::backoff::BackoffPolicy;
    use crate::resilience::CircuitState;
    use url::Url;

    fn client_for(url: &str, threshold: u32) -> (Arc<UpstreamClient>, Arc<ResponseCache>) {
        let cache = Arc::new(ResponseCache::with_capacity(10, Duration::from_secs(60)));
        let deps = ClientDeps {
            cache: cache.clone(),
            limiter: Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            retrier: BackoffRetrier::new(0, BackoffPolicy::from(&RetryConfig::default())),
            http: build_http_client(&HttpClientConfig::default()).unwrap(),
        };
        let descriptor = UpstreamDescriptor::new("svc-a", Url::parse(url).unwrap(), Duration::from_secs(60));
        let breaker = CircuitBreakerConfig {
            failure_threshold: threshold,
            success_threshold: 1,
            cooldown_ms: 60_000,
        };
        (Arc::new(UpstreamClient::new(descriptor, &breaker, deps)), cache)
    }

    #[tokio::test]
    async fn test_connection_failure_opens_circuit() {
        // nothing listens on port 1
        let (client, _) = client_for("http://127.0.0.1:1/", 1);

        let err = client.fetch().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Connect(_) | UpstreamError::Transport(_)), "{err:?}");
        assert_eq!(client.breaker().state(), CircuitState::Open);

        let err = client.fetch().await.unwrap_err();
        assert_eq!(err, UpstreamError::CircuitOpen("svc-a".into()));
    }

    #[tokio::test]
    async fn test_open_circuit_serves_cached_payload_as_stale() {
        let (client, cache) = client_for("http://127.0.0.1:1/", 1);
        let _ = client.fetch().await;
        assert_eq!(client.breaker().state(), CircuitState::Open);

        cache.set(&cache_key("svc-a", &json!({})), json!({"v": 1}), "svc-a", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let response = client.fetch().await.unwrap();
        assert!(response.stale);
        assert!(response.from_cache);
        assert_eq!(response.data, json!({"v": 1}));
        assert_eq!(response.source, "svc-a");
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_network() {
        let (client, cache) = client_for("http://127.0.0.1:1/", 5);
        cache.set(&cache_key("svc-a", &json!({})), json!([1, 2]), "svc-a", Duration::from_secs(60));

        let response = client.fetch().await.unwrap();
        assert!(response.from_cache);
        assert!(!response.stale);
        assert_eq!(response.data, json!([1, 2]));
        assert_eq!(client.breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_answer_keeps_circuit_closed() {
        let (client, cache) = client_for("http://127.0.0.1:1/", 1);
        cache.set(&cache_key("svc-a", &json!({})), json!({"v": 2}), "svc-a", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let response = client.fetch().await.unwrap();
        assert!(response.stale);
        assert_eq!(response.data, json!({"v": 2}));
        assert_eq!(client.breaker().state(), CircuitState::Closed);
        assert_eq!(client.breaker().failure_count(), 0);
    }
}
