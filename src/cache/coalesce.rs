//! In-flight registry used to coalesce identical concurrent fetches.
//!
//! The first caller for a key registers a shared future; later callers for
//! the same key await a clone of it and observe the same outcome. The
//! shared future removes its own placeholder when it settles.

use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::cache::store::CacheLookup;
use crate::upstream::types::UpstreamResult;

/// A fetch whose result is shared by every caller of one key.
pub type SharedFetch = Shared<BoxFuture<'static, UpstreamResult<CacheLookup>>>;

/// At most one pending fetch per cache key.
#[derive(Default)]
pub struct InFlightRegistry {
    pending: Mutex<HashMap<String, SharedFetch>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending fetch for `key`, or register the one built by `start`.
    ///
    /// Returns the shared fetch and whether this caller started it.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (SharedFetch, bool)
    where
        F: FnOnce() -> BoxFuture<'static, UpstreamResult<CacheLookup>>,
    {
        let mut pending = self.pending.lock().expect("in-flight registry mutex poisoned");
        if let Some(existing) = pending.get(key) {
            return (existing.clone(), false);
        }
        let fetch = start().shared();
        pending.insert(key.to_string(), fetch.clone());
        (fetch, true)
    }

    /// Drop the placeholder for `key`.
    pub fn remove(&self, key: &str) {
        self.pending
            .lock()
            .expect("in-flight registry mutex poisoned")
            .remove(key);
    }

    /// Number of keys with a pending fetch.
    pub fn len(&self) -> usize {
        self.pending.lock().expect("in-flight registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ready(n: i64) -> BoxFuture<'static, UpstreamResult<CacheLookup>> {
        async move {
            Ok(CacheLookup {
                payload: json!(n),
                from_cache: false,
                cache_age: None,
                stale: false,
            })
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_second_caller_joins() {
        let registry = InFlightRegistry::new();
        let (first, started) = registry.join_or_start("k", || ready(1));
        assert!(started);
        let (second, started) = registry.join_or_start("k", || ready(2));
        assert!(!started);
        assert_eq!(registry.len(), 1);

        assert_eq!(first.await.unwrap().payload, json!(1));
        assert_eq!(second.await.unwrap().payload, json!(1));

        registry.remove("k");
        assert!(registry.is_empty());
    }
}
