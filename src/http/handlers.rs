//! Route handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use crate::aggregation::{AggregateData, AggregationError, AggregationReport, FailedApi, StrategyKind};
use crate::cache::CacheStats;
use crate::http::request::RequestId;
use crate::http::stats::{RequestStats, RequestStatsSnapshot};
use crate::lifecycle::Runtime;
use crate::offload::PoolStats;
use crate::rate_limit::limiter::RateLimiterStats;
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::upstream::types::epoch_millis;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub stats: Arc<RequestStats>,
    pub started: Instant,
}

/// Body of `POST /api/aggregate`; both fields fall back to configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct AggregateRequest {
    #[serde(default)]
    pub strategy: Option<String>,
    /// Per-upstream timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateMetadata {
    successful: usize,
    failed: usize,
    #[serde(rename = "failedAPIs")]
    failed_apis: Vec<FailedApi>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_cache: Option<usize>,
    strategy: StrategyKind,
    response_time_ms: u64,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct AggregateBody {
    success: bool,
    data: AggregateData,
    metadata: AggregateMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsBody {
    pub stats: RequestStatsSnapshot,
    pub circuit_breakers: Vec<CircuitSnapshot>,
    pub cache: CacheStats,
    pub rate_limiter: RateLimiterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offload: Option<PoolStats>,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": epoch_millis(),
        "uptimeSecs": state.started.elapsed().as_secs(),
    }))
}

/// `GET /api/aggregate`: best-effort with the configured timeout.
pub async fn aggregate_default(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Response {
    let timeout = state.runtime.engine.default_timeout();
    run_aggregation(&state, &request_id, Ok(StrategyKind::BestEffort), timeout).await
}

/// `POST /api/aggregate`: caller-chosen strategy and timeout.
pub async fn aggregate_custom(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<AggregateRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(request_id = %request_id.0, error = %rejection.body_text(), "rejected aggregate body");
            return error_response(rejection.status(), rejection.body_text(), &request_id, 0);
        }
    };
    let strategy = request
        .strategy
        .as_deref()
        .unwrap_or(state.runtime.config.aggregation.default_strategy.as_str())
        .parse::<StrategyKind>();
    let timeout = request
        .timeout
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.runtime.engine.default_timeout());
    run_aggregation(&state, &request_id, strategy, timeout).await
}

fn error_response(status: StatusCode, error: String, request_id: &RequestId, response_time_ms: u64) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": error,
            "metadata": {
                "responseTimeMs": response_time_ms,
                "requestId": request_id.0,
            },
        })),
    )
        .into_response()
}

async fn run_aggregation(
    state: &AppState,
    request_id: &RequestId,
    strategy: Result<StrategyKind, AggregationError>,
    timeout: Duration,
) -> Response {
    let started = Instant::now();
    let result: Result<(StrategyKind, AggregationReport), AggregationError> = match strategy {
        Ok(kind) => state.runtime.engine.aggregate(kind, timeout).await.map(|report| (kind, report)),
        Err(e) => Err(e),
    };
    let elapsed = started.elapsed();
    state.stats.record(result.is_ok(), elapsed);
    let response_time_ms = elapsed.as_millis() as u64;

    match result {
        Ok((strategy, report)) => Json(AggregateBody {
            success: true,
            data: report.data,
            metadata: AggregateMetadata {
                successful: report.successful,
                failed: report.failed,
                failed_apis: report.failed_apis,
                from_cache: report.from_cache,
                strategy,
                response_time_ms,
                request_id: request_id.0.clone(),
            },
        })
        .into_response(),
        Err(e) => {
            tracing::error!(request_id = %request_id.0, error = %e, "aggregation request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), request_id, response_time_ms)
        }
    }
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsBody> {
    let runtime = &state.runtime;
    Json(StatsBody {
        stats: state.stats.snapshot(),
        circuit_breakers: runtime.engine.circuit_status(),
        cache: runtime.cache.stats(),
        rate_limiter: runtime.limiter.stats(),
        offload: runtime.offload.as_ref().map(|pool| pool.stats()),
    })
}
