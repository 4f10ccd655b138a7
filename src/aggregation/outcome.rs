//! Fan-out outcomes and aggregation reports.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::upstream::{UpstreamResponse, UpstreamResult};

/// Per-upstream results of one fan-out, in upstream order.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    slots: Vec<UpstreamResult<UpstreamResponse>>,
}

impl AggregateOutcome {
    pub fn new(slots: Vec<UpstreamResult<UpstreamResponse>>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[UpstreamResult<UpstreamResponse>] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<UpstreamResult<UpstreamResponse>> {
        self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn successful(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.successful()
    }
}

/// A failed slot: its upstream position and the error message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedApi {
    pub index: usize,
    pub reason: String,
}

/// Aggregated payload: raw per-upstream responses, or the offload pool's output.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum AggregateData {
    Raw(Vec<UpstreamResponse>),
    Processed(Value),
}

impl AggregateData {
    /// Raw responses, if the data has not been post-processed.
    pub fn responses(&self) -> Option<&[UpstreamResponse]> {
        match self {
            AggregateData::Raw(responses) => Some(responses),
            AggregateData::Processed(_) => None,
        }
    }
}

/// Result of applying a strategy to an [`AggregateOutcome`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub data: AggregateData,
    pub successful: usize,
    pub failed: usize,
    #[serde(rename = "failedAPIs")]
    pub failed_apis: Vec<FailedApi>,
    /// Slots answered by the cached-fallback store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<usize>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    /// All-or-nothing strategy with at least one failed slot.
    #[error("All or Nothing: {} APIs failed [{}]", .failures.len(), describe(.failures))]
    AllOrNothing { failures: Vec<FailedApi> },

    #[error("Unknown strategy type: {0}")]
    UnknownStrategy(String),
}

fn describe(failures: &[FailedApi]) -> String {
    failures
        .iter()
        .map(|f| format!("#{}: {}", f.index, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;
    use serde_json::json;

    fn response(source: &str) -> UpstreamResponse {
        UpstreamResponse {
            source: source.to_string(),
            data: json!({}),
            timestamp: 0,
            from_cache: false,
            cache_age: None,
            stale: false,
        }
    }

    #[test]
    fn test_outcome_counts() {
        let outcome = AggregateOutcome::new(vec![
            Ok(response("a")),
            Err(UpstreamError::HttpStatus { status: 404 }),
            Ok(response("c")),
        ]);
        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.successful(), 2);
        assert_eq!(outcome.failed(), 1);
    }

    #[test]
    fn test_report_wire_format() {
        let report = AggregationReport {
            data: AggregateData::Raw(vec![response("a")]),
            successful: 1,
            failed: 1,
            failed_apis: vec![FailedApi {
                index: 1,
                reason: "HTTP 404".into(),
            }],
            from_cache: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["failedAPIs"][0]["index"], 1);
        assert_eq!(value["data"][0]["source"], "a");
        assert!(value.get("fromCache").is_none());
    }

    #[test]
    fn test_all_or_nothing_error_names_indices() {
        let err = AggregationError::AllOrNothing {
            failures: vec![
                FailedApi { index: 2, reason: "HTTP 404".into() },
                FailedApi { index: 7, reason: "HTTP 500".into() },
            ],
        };
        assert_eq!(
            err.to_string(),
            "All or Nothing: 2 APIs failed [#2: HTTP 404, #7: HTTP 500]"
        );
    }
}
