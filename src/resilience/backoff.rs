//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay parameters for the retrier.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for a 0-indexed attempt: `min(max, base * factor^attempt)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let max_ms = self.max.as_millis() as f64;
        // NaN/inf from huge exponents collapse to the ceiling
        let capped = if delay_ms.is_finite() { delay_ms.min(max_ms) } else { max_ms };
        Duration::from_millis(capped as u64)
    }
}

/// Calculate the delay before retrying after the given 0-indexed attempt.
///
/// With jitter on, the ceiling is replaced by a uniform sample of `[0, ceiling]`.
pub fn calculate_backoff(attempt: u32, policy: &BackoffPolicy) -> Duration {
    let ceiling = policy.ceiling(attempt);
    if !policy.jitter || ceiling.is_zero() {
        return ceiling;
    }
    let ceiling_ms = ceiling.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1000),
            factor: 2.0,
            max: Duration::from_millis(10_000),
            jitter,
        }
    }

    #[test]
    fn test_ceiling_grows_and_caps() {
        let p = policy(false);
        assert_eq!(p.ceiling(0), Duration::from_millis(1000));
        assert_eq!(p.ceiling(1), Duration::from_millis(2000));
        assert_eq!(p.ceiling(2), Duration::from_millis(4000));
        assert_eq!(p.ceiling(3), Duration::from_millis(8000));
        assert_eq!(p.ceiling(4), Duration::from_millis(10_000));
        assert_eq!(p.ceiling(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jittered_delay_is_bounded() {
        let p = policy(true);
        for attempt in 0..6 {
            let bound = Duration::from_millis(10_000.min(1000 * 2u64.pow(attempt)));
            for _ in 0..200 {
                assert!(calculate_backoff(attempt, &p) <= bound);
            }
        }
    }

    #[test]
    fn test_without_jitter_delay_is_ceiling() {
        let p = policy(false);
        assert_eq!(calculate_backoff(2, &p), Duration::from_millis(4000));
    }

    #[test]
    fn test_from_config() {
        let p = BackoffPolicy::from(&RetryConfig::default());
        assert_eq!(p, policy(true));
    }
}
