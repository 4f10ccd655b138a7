//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race a spawned call against a deadline
//! - Abandon interest on expiry without cancelling the call
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The call runs in its own task, so losing the race leaves it running to
//!   completion; late completions still update cache and circuit state

use std::future::Future;
use std::time::Duration;

/// Outcome of a detached, deadline-bounded call.
#[derive(Debug)]
pub enum Deadline<T> {
    Completed(T),
    /// The deadline fired first; the call keeps running in the background.
    Elapsed,
    /// The spawned task panicked.
    Panicked(String),
}

/// Spawn `fut` and wait for it at most `limit`.
pub async fn detached_with_deadline<F>(limit: Duration, fut: F) -> Deadline<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(value)) => Deadline::Completed(value),
        Ok(Err(join_error)) => Deadline::Panicked(join_error.to_string()),
        Err(_) => Deadline::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fast_call_completes() {
        let outcome = detached_with_deadline(Duration::from_millis(100), async { 7 }).await;
        assert!(matches!(outcome, Deadline::Completed(7)));
    }

    #[tokio::test]
    async fn test_slow_call_keeps_running_after_deadline() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let outcome = detached_with_deadline(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .await;

        assert!(matches!(outcome, Deadline::Elapsed));
        assert!(!finished.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_call_is_reported() {
        let outcome = detached_with_deadline(Duration::from_millis(100), async {
            panic!("boom");
        })
        .await;
        assert!(matches!(outcome, Deadline::Panicked(_)));
    }
}
