//! Concurrent fan-out across every upstream client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;

use crate::aggregation::outcome::{AggregateData, AggregateOutcome, AggregationError, AggregationReport};
use crate::aggregation::strategy::{strategy_for, FallbackCache, StrategyKind};
use crate::observability::metrics;
use crate::offload::{OffloadPool, OffloadTask, TaskKind};
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::resilience::timeouts::{detached_with_deadline, Deadline};
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamResponse, UpstreamResult};

pub struct AggregationEngine {
    clients: Vec<Arc<UpstreamClient>>,
    fallback: Arc<FallbackCache>,
    offload: Option<Arc<OffloadPool>>,
    default_timeout: Duration,
}

impl AggregationEngine {
    pub fn new(clients: Vec<Arc<UpstreamClient>>, fallback: Arc<FallbackCache>) -> Self {
        Self {
            clients,
            fallback,
            offload: None,
            default_timeout: Duration::from_millis(5000),
        }
    }

    /// Post-process successful batches on `pool`.
    pub fn with_offload(mut self, pool: Arc<OffloadPool>) -> Self {
        self.offload = Some(pool);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn clients(&self) -> &[Arc<UpstreamClient>] {
        &self.clients
    }

    /// Fetch every upstream concurrently, each bounded by `timeout`.
    ///
    /// A slot that misses its deadline is recorded as a timeout; its fetch
    /// keeps running and may still update cache and circuit state.
    pub async fn fan_out(&self, timeout: Duration) -> AggregateOutcome {
        let calls = self.clients.iter().map(|client| {
            let client = Arc::clone(client);
            async move {
                let name = client.name().to_string();
                match detached_with_deadline(timeout, async move { client.fetch().await }).await {
                    Deadline::Completed(result) => result,
                    Deadline::Elapsed => {
                        tracing::warn!(upstream = %name, timeout_ms = timeout.as_millis() as u64, "upstream slot timed out");
                        Err(UpstreamError::Timeout(format!(
                            "no response within {}ms",
                            timeout.as_millis()
                        )))
                    }
                    Deadline::Panicked(message) => {
                        tracing::error!(upstream = %name, error = %message, "upstream fetch panicked");
                        Err(UpstreamError::Transport(message))
                    }
                }
            }
        });
        let slots: Vec<UpstreamResult<UpstreamResponse>> = join_all(calls).await;
        AggregateOutcome::new(slots)
    }

    /// Fan out, reconcile with `kind`, then optionally offload post-processing.
    pub async fn aggregate(
        &self,
        kind: StrategyKind,
        timeout: Duration,
    ) -> Result<AggregationReport, AggregationError> {
        let started = Instant::now();
        tracing::info!(strategy = %kind, upstreams = self.clients.len(), "starting aggregation");

        let outcome = self.fan_out(timeout).await;
        let strategy = strategy_for(kind, &self.fallback);
        let mut report = match strategy.aggregate(outcome) {
            Ok(report) => report,
            Err(e) => {
                metrics::record_aggregation(kind.as_str(), "failure");
                tracing::warn!(strategy = %kind, error = %e, "aggregation failed");
                return Err(e);
            }
        };

        if let Some(pool) = &self.offload {
            let processed = match &report.data {
                AggregateData::Raw(responses) if !responses.is_empty() => {
                    self.post_process(pool, responses).await
                }
                _ => None,
            };
            if let Some(processed) = processed {
                report.data = AggregateData::Processed(processed);
            }
        }

        metrics::record_aggregation(kind.as_str(), "success");
        tracing::info!(
            strategy = %kind,
            successful = report.successful,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregation complete"
        );
        Ok(report)
    }

    /// Parse `name` and aggregate; unknown names fail before any fetch.
    pub async fn aggregate_named(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<AggregationReport, AggregationError> {
        let kind: StrategyKind = name.parse()?;
        self.aggregate(kind, timeout).await
    }

    /// Offload failure keeps the unprocessed data.
    async fn post_process(&self, pool: &OffloadPool, responses: &[UpstreamResponse]) -> Option<serde_json::Value> {
        let data = match serde_json::to_value(responses) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode responses for offload");
                return None;
            }
        };
        match pool.execute(OffloadTask::new(TaskKind::Aggregate, data)).await {
            Ok(processed) => Some(processed),
            Err(e) => {
                tracing::warn!(error = %e, "offload failed, serving unprocessed data");
                None
            }
        }
    }

    pub fn circuit_status(&self) -> Vec<CircuitSnapshot> {
        self.clients.iter().map(|client| client.circuit_status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::cache_key;
    use crate::cache::ResponseCache;
    use crate::config::schema::HttpClientConfig;
    use crate::config::{CircuitBreakerConfig, RateLimitConfig};
    use crate::rate_limit::RateLimiter;
    use crate::resilience::backoff::BackoffPolicy;
    use crate::resilience::BackoffRetrier;
    use crate::upstream::{build_http_client, ClientDeps, UpstreamDescriptor};
    use serde_json::json;
    use url::Url;

    struct Fixture {
        engine: AggregationEngine,
        cache: Arc<ResponseCache>,
    }

    fn fixture(urls: &[&str]) -> Fixture {
        let cache = Arc::new(ResponseCache::with_capacity(100, Duration::from_secs(60)));
        let deps = ClientDeps {
            cache: cache.clone(),
            limiter: Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            retrier: BackoffRetrier::new(0, BackoffPolicy::from(&crate::config::RetryConfig::default())),
            http: build_http_client(&HttpClientConfig::default()).unwrap(),
        };
        let clients = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let descriptor =
                    UpstreamDescriptor::new(format!("svc-{i}"), Url::parse(url).unwrap(), Duration::from_secs(60));
                Arc::new(UpstreamClient::new(descriptor, &CircuitBreakerConfig::default(), deps.clone()))
            })
            .collect();
        Fixture {
            engine: AggregationEngine::new(clients, Arc::new(FallbackCache::new(Duration::from_secs(300)))),
            cache,
        }
    }

    fn prime(cache: &ResponseCache, name: &str, payload: serde_json::Value) {
        cache.set(&cache_key(name, &json!({})), payload, name, Duration::from_secs(60));
    }

    // nothing listens on port 1, so these fail fast
    const DEAD: &str = "http://127.0.0.1:1/";

    #[tokio::test]
    async fn test_best_effort_reports_failed_indices() {
        let f = fixture(&[DEAD, DEAD, DEAD]);
        prime(&f.cache, "svc-0", json!({"a": 1}));
        prime(&f.cache, "svc-2", json!({"c": 3}));

        let report = f
            .engine
            .aggregate(StrategyKind::BestEffort, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_apis[0].index, 1);
    }

    #[tokio::test]
    async fn test_unknown_strategy_name() {
        let f = fixture(&[DEAD]);
        let err = f
            .engine
            .aggregate_named("quorum", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, AggregationError::UnknownStrategy("quorum".into()));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let f = fixture(&[&url]);
        let started = Instant::now();
        let outcome = f.engine.fan_out(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        match &outcome.slots()[0] {
            Err(UpstreamError::Timeout(message)) => assert!(message.contains("100ms")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offload_replaces_data_with_summary() {
        let f = fixture(&[DEAD, DEAD]);
        prime(&f.cache, "svc-0", json!({"users": [1]}));
        let pool = Arc::new(OffloadPool::new(1).unwrap());
        let engine = f.engine.with_offload(pool.clone());

        let report = engine
            .aggregate(StrategyKind::BestEffort, Duration::from_secs(2))
            .await
            .unwrap();
        match &report.data {
            AggregateData::Processed(value) => {
                assert_eq!(value["totalSources"], 1);
                assert_eq!(value["stats"]["hasUsers"], true);
            }
            other => panic!("expected processed data, got {other:?}"),
        }
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_circuit_status_lists_every_upstream() {
        let f = fixture(&[DEAD, DEAD]);
        let status = f.engine.circuit_status();
        let names: Vec<&str> = status.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["svc-0", "svc-1"]);
    }
}
