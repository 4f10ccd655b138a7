//! Aggregation strategies.
//!
//! Each strategy turns an [`AggregateOutcome`] into a report or an error.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::aggregation::outcome::{
    AggregateData, AggregateOutcome, AggregationError, AggregationReport, FailedApi,
};
use crate::upstream::UpstreamResponse;

/// Named strategies accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    BestEffort,
    AllOrNothing,
    CachedFallback,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::BestEffort => "best-effort",
            StrategyKind::AllOrNothing => "all-or-nothing",
            StrategyKind::CachedFallback => "cached-fallback",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best-effort" => Ok(StrategyKind::BestEffort),
            "all-or-nothing" => Ok(StrategyKind::AllOrNothing),
            "cached-fallback" => Ok(StrategyKind::CachedFallback),
            other => Err(AggregationError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for reconciling a batch of per-upstream outcomes.
pub trait AggregationStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    fn aggregate(&self, outcome: AggregateOutcome) -> Result<AggregationReport, AggregationError>;
}

/// Split an outcome into successes and indexed failures.
fn partition(outcome: AggregateOutcome) -> (Vec<UpstreamResponse>, Vec<FailedApi>) {
    let mut successful = Vec::new();
    let mut failed = Vec::new();
    for (index, slot) in outcome.into_slots().into_iter().enumerate() {
        match slot {
            Ok(response) => successful.push(response),
            Err(e) => failed.push(FailedApi {
                index,
                reason: e.to_string(),
            }),
        }
    }
    (successful, failed)
}

/// Returns every success; failures are reported but never fail the batch.
#[derive(Debug, Default)]
pub struct BestEffort;

impl AggregationStrategy for BestEffort {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BestEffort
    }

    fn aggregate(&self, outcome: AggregateOutcome) -> Result<AggregationReport, AggregationError> {
        let (successful, failed) = partition(outcome);
        for failure in &failed {
            tracing::warn!(index = failure.index, reason = %failure.reason, "upstream slot failed");
        }
        Ok(AggregationReport {
            successful: successful.len(),
            failed: failed.len(),
            data: AggregateData::Raw(successful),
            failed_apis: failed,
            from_cache: None,
        })
    }
}

/// Fails the whole batch if any slot failed.
#[derive(Debug, Default)]
pub struct AllOrNothing;

impl AggregationStrategy for AllOrNothing {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AllOrNothing
    }

    fn aggregate(&self, outcome: AggregateOutcome) -> Result<AggregationReport, AggregationError> {
        let (successful, failed) = partition(outcome);
        if !failed.is_empty() {
            return Err(AggregationError::AllOrNothing { failures: failed });
        }
        Ok(AggregationReport {
            successful: successful.len(),
            failed: 0,
            data: AggregateData::Raw(successful),
            failed_apis: Vec::new(),
            from_cache: None,
        })
    }
}

/// Last successful response per upstream position, kept for a fixed TTL.
#[derive(Debug)]
pub struct FallbackCache {
    ttl: Duration,
    entries: DashMap<usize, (UpstreamResponse, Instant)>,
}

impl FallbackCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn store(&self, index: usize, response: UpstreamResponse) {
        self.entries.insert(index, (response, Instant::now()));
    }

    /// The stored response if younger than the TTL; older ones are dropped.
    pub fn lookup(&self, index: usize) -> Option<(UpstreamResponse, Duration)> {
        let age = {
            let entry = self.entries.get(&index)?;
            entry.1.elapsed()
        };
        if age > self.ttl {
            self.entries.remove(&index);
            return None;
        }
        self.entries.get(&index).map(|entry| (entry.0.clone(), age))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Substitutes a recent success for a failed slot when one is stored.
#[derive(Debug)]
pub struct CachedFallback {
    cache: Arc<FallbackCache>,
}

impl CachedFallback {
    pub fn new(cache: Arc<FallbackCache>) -> Self {
        Self { cache }
    }
}

impl AggregationStrategy for CachedFallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CachedFallback
    }

    fn aggregate(&self, outcome: AggregateOutcome) -> Result<AggregationReport, AggregationError> {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut from_cache = 0;

        for (index, slot) in outcome.into_slots().into_iter().enumerate() {
            match slot {
                Ok(response) => {
                    self.cache.store(index, response.clone());
                    successful.push(response);
                }
                Err(e) => match self.cache.lookup(index) {
                    Some((mut cached, age)) => {
                        tracing::info!(index, source = %cached.source, "using fallback cache for failed slot");
                        cached.from_cache = true;
                        cached.cache_age = Some(age.as_millis() as u64);
                        successful.push(cached);
                        from_cache += 1;
                    }
                    None => failed.push(FailedApi {
                        index,
                        reason: e.to_string(),
                    }),
                },
            }
        }

        Ok(AggregationReport {
            successful: successful.len(),
            failed: failed.len(),
            data: AggregateData::Raw(successful),
            failed_apis: failed,
            from_cache: Some(from_cache),
        })
    }
}

/// Build the strategy for `kind`; cached-fallback shares `fallback`.
pub fn strategy_for(kind: StrategyKind, fallback: &Arc<FallbackCache>) -> Box<dyn AggregationStrategy> {
    match kind {
        StrategyKind::BestEffort => Box::new(BestEffort),
        StrategyKind::AllOrNothing => Box::new(AllOrNothing),
        StrategyKind::CachedFallback => Box::new(CachedFallback::new(Arc::clone(fallback))),
    }
}
