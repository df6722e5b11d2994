//! In-flight request cache.
//!
//! Maps a key to the shared future of a request that is still outstanding, so concurrent
//! callers asking for the same key await one underlying call. An entry removes itself when
//! its future settles, whether it succeeded or failed; nothing else clears it.

use composable_request_core::{Data, QueryFuture};
use futures::future::{FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A request future that any number of callers can await
pub type SharedQuery<R> = Shared<QueryFuture<R>>;

type Entries = Mutex<HashMap<String, InFlight>>;

struct InFlight {
    id: u64,
    query: Arc<dyn Any + Send + Sync>,
}

fn settle(entries: &Weak<Entries>, key: &str, id: u64) {
    if let Some(entries) = entries.upgrade() {
        let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
        }
    }
}

/// Process-wide map from key to outstanding request
///
/// Cheap to clone; clones share storage.
#[derive(Clone, Default)]
pub struct PromiseCache {
    entries: Arc<Entries>,
    next_id: Arc<AtomicU64>,
}

impl PromiseCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The outstanding request for `key` and its identifier, if one exists with data type `R`
    #[must_use]
    pub fn get<R: Data>(&self, key: &str) -> Option<(u64, SharedQuery<R>)> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        entry
            .query
            .downcast_ref::<SharedQuery<R>>()
            .map(|query| (entry.id, query.clone()))
    }

    /// Register `query` as the outstanding request for `key`
    ///
    /// Replaces any previous entry. The entry is removed when `query` settles unless it
    /// has been replaced in the meantime.
    pub fn insert<R: Data>(&self, key: &str, query: QueryFuture<R>) -> (u64, SharedQuery<R>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entries = Arc::downgrade(&self.entries);
        let owned_key = key.to_string();
        let shared = async move {
            let result = query.await;
            settle(&entries, &owned_key, id);
            result
        }
        .boxed()
        .shared();

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                InFlight {
                    id,
                    query: Arc::new(shared.clone()),
                },
            );
        (id, shared)
    }

    /// Check if a request for `key` is outstanding
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if nothing is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every outstanding request (the requests themselves keep running)
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for PromiseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseCache").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use composable_request_core::RequestError;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_entry_shared_and_removed_on_success() {
        let cache = PromiseCache::new();
        let (id, first) = cache.insert::<u32>(
            "k",
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(7)
            }
            .boxed(),
        );
        let (same_id, second) = cache.get::<u32>("k").unwrap();
        assert_eq!(id, same_id);
        assert!(cache.get::<String>("k").is_none());

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert!(!cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_removed_on_failure() {
        let cache = PromiseCache::new();
        let (_, query) =
            cache.insert::<u32>("k", async { Err(RequestError::msg("down")) }.boxed());
        assert!(query.await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_entry_survives_older_settle() {
        let cache = PromiseCache::new();
        let (_, old) = cache.insert::<u32>("k", async { Ok(1) }.boxed());
        let (new_id, _new) = cache.insert::<u32>(
            "k",
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(2)
            }
            .boxed(),
        );
        assert_eq!(old.await.unwrap(), 1);
        assert_eq!(cache.get::<u32>("k").map(|(id, _)| id), Some(new_id));
    }
}
