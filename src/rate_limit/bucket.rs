//! Continuous-refill token bucket.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilled lazily on every access.
///
/// Tokens are kept in `[0, capacity]`. `consume` never rejects: when the
/// bucket is short it sleeps for the time the deficit needs to accrue and
/// tries again.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

/// Point-in-time view of a bucket.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// Whole tokens currently available.
    pub tokens: u64,
    pub capacity: f64,
    pub refill_rate: f64,
}

impl TokenBucket {
    /// Create a full bucket. `refill_rate` is in tokens per second and must be positive.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bring the token count up to date.
    pub fn refill(&self) {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        self.refill_locked(&mut state);
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Take `n` tokens without waiting. Returns the wait needed when short.
    fn try_consume(&self, n: f64) -> Result<(), Duration> {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        self.refill_locked(&mut state);

        if state.tokens >= n {
            state.tokens -= n;
            Ok(())
        } else {
            let shortage = n - state.tokens;
            Err(Duration::from_secs_f64(shortage / self.refill_rate))
        }
    }

    /// Take `n` tokens, suspending until they have accrued.
    ///
    /// Requests larger than the capacity are clamped to it.
    pub async fn consume(&self, n: f64) -> Duration {
        let n = n.min(self.capacity);
        let mut waited = Duration::ZERO;
        loop {
            match self.try_consume(n) {
                Ok(()) => return waited,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "token bucket short, waiting");
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Current tokens (rounded down), capacity and rate.
    pub fn status(&self) -> BucketStatus {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        self.refill_locked(&mut state);
        BucketStatus {
            tokens: state.tokens.floor() as u64,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
        }
    }

    /// Exact token count after refilling.
    pub fn tokens(&self) -> f64 {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        self.refill_locked(&mut state);
        state.tokens
    }
}
