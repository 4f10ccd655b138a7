//! Inbound request statistics.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Running mean over every completed request, in milliseconds.
    pub avg_response_time_ms: f64,
}

/// Totals and running mean response time of aggregation requests.
#[derive(Debug, Default)]
pub struct RequestStats {
    inner: Mutex<RequestStatsSnapshot>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, success: bool, elapsed: Duration) {
        let mut stats = self.inner.lock().expect("request stats mutex poisoned");
        stats.total_requests += 1;
        if success {
            stats.successful_requests += 1;
        } else {
            stats.failed_requests += 1;
        }
        let completed = (stats.successful_requests + stats.failed_requests) as f64;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        stats.avg_response_time_ms += (elapsed_ms - stats.avg_response_time_ms) / completed;
    }

    pub fn snapshot(&self) -> RequestStatsSnapshot {
        self.inner.lock().expect("request stats mutex poisoned").clone()
    }
}
