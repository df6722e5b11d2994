//! Timed value cache.
//!
//! Maps a string key to a value with a per-entry expiry timer, plus per-key change
//! listeners so engines sharing a cache key stay synchronized.
//!
//! Values are stored type-erased so a single instance can serve engines of any data type;
//! reads downcast back to the caller's type and miss on mismatch.

use crate::timer::spawn_detached;
use composable_request_core::Lifetime;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::AbortHandle;
use tokio::time::Instant;

type Listener = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    generation: u64,
    expires_at: Option<Instant>,
    expiry: Option<AbortHandle>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }
}

#[derive(Default)]
struct ValueCacheInner {
    entries: Mutex<HashMap<String, Slot>>,
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl ValueCacheInner {
    fn expire(&self, key: &str, generation: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|slot| slot.generation == generation) {
            entries.remove(key);
            tracing::debug!(key, "Cache entry expired");
        }
    }
}

/// Process-wide map from key to `{ value, expiry }`
///
/// Cheap to clone; clones share storage.
#[derive(Clone, Default)]
pub struct ValueCache {
    inner: Arc<ValueCacheInner>,
}

impl ValueCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, hard-deleting it after `cache_time`
    ///
    /// Re-setting a key restarts its expiry.
    pub fn set<T>(&self, key: &str, value: T, cache_time: Lifetime)
    where
        T: Send + Sync + 'static,
    {
        let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let ttl = cache_time.as_duration();
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let expiry = ttl.and_then(|ttl| {
            let weak: Weak<ValueCacheInner> = Arc::downgrade(&self.inner);
            let key = key.to_string();
            spawn_detached(async move {
                tokio::time::sleep(ttl).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire(&key, generation);
                }
            })
        });

        let slot = Slot {
            value: Arc::new(value),
            generation,
            expires_at,
            expiry,
        };
        let previous = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), slot);
        drop(previous);
    }

    /// Read the value under `key`
    ///
    /// Returns `None` if the key is absent, expired, or holds a different type.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        let mut entries = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.get(key)?.is_expired(Instant::now()) {
            entries.remove(key);
            return None;
        }
        let value = entries.get(key)?.value.downcast_ref::<T>().cloned();
        if value.is_none() {
            tracing::debug!(key, "Cache entry holds a different type");
        }
        value
    }

    /// Check if a live entry exists under `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|slot| !slot.is_expired(now))
    }

    /// Delete the entry under `key`
    pub fn remove(&self, key: &str) -> bool {
        let removed = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        removed.is_some()
    }

    /// Delete every entry
    pub fn clear(&self) {
        let drained: Vec<Slot> = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        tracing::debug!(count = drained.len(), "Cleared value cache");
    }

    /// Number of stored entries (expired entries not yet reaped included)
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listen for values written under `key` through [`notify`](Self::notify)
    ///
    /// The listener is removed when the returned subscription is dropped.
    #[must_use]
    pub fn subscribe<T, F>(&self, key: &str, listener: F) -> CacheSubscription
    where
        T: 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let erased: Listener = Arc::new(move |value: &(dyn Any + Send + Sync)| {
            if let Some(value) = value.downcast_ref::<T>() {
                listener(value);
            }
        });
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push((id, erased));
        CacheSubscription {
            cache: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
        }
    }

    /// Deliver `value` to every listener of `key` except `skip`
    pub fn notify<T>(&self, key: &str, value: &T, skip: Option<u64>)
    where
        T: Send + Sync + 'static,
    {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(id, _)| Some(*id) != skip)
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect()
            })
            .unwrap_or_default();
        let erased: &(dyn Any + Send + Sync) = value;
        for listener in listeners {
            listener(erased);
        }
    }

    /// Number of live listeners for `key`
    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCache").field("len", &self.len()).finish()
    }
}

/// Listener registration on a [`ValueCache`] key; unsubscribes on drop
#[derive(Debug)]
#[must_use = "dropping the subscription removes the listener"]
pub struct CacheSubscription {
    cache: Weak<ValueCacheInner>,
    key: String,
    id: u64,
}

impl CacheSubscription {
    /// Identifier used to skip this listener in [`ValueCache::notify`]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Key this subscription listens on
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CacheSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.cache.upgrade() {
            let mut listeners = inner.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entries) = listeners.get_mut(&self.key) {
                entries.retain(|(id, _)| *id != self.id);
                if entries.is_empty() {
                    listeners.remove(&self.key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_round_trip() {
        let cache = ValueCache::new();
        cache.set("k", 42_u32, Lifetime::Finite(Duration::from_secs(1)));
        assert_eq!(cache.get::<u32>("k"), Some(42));
        assert_eq!(cache.get::<String>("k"), None);
        assert_eq!(cache.get::<u32>("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_evicted_after_cache_time() {
        let cache = ValueCache::new();
        cache.set("k", "v".to_string(), Lifetime::Finite(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(cache.contains("k"));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!cache.contains("k"));
        assert_eq!(cache.get::<String>("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_entries_never_expire() {
        let cache = ValueCache::new();
        cache.set("k", 1_i32, Lifetime::Infinite);
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get::<i32>("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_clear() {
        let cache = ValueCache::new();
        cache.set("a", 1_i32, Lifetime::Infinite);
        cache.set("b", 2_i32, Lifetime::Infinite);
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_notify_skips_own_listener_and_unsubscribes_on_drop() {
        let cache = ValueCache::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let first = cache.subscribe("k", move |value: &usize| {
            counter.fetch_add(*value, Ordering::SeqCst);
        });
        let counter = Arc::clone(&seen);
        let second = cache.subscribe("k", move |value: &usize| {
            counter.fetch_add(*value * 10, Ordering::SeqCst);
        });
        assert_eq!(cache.listener_count("k"), 2);

        cache.notify("k", &1_usize, Some(first.id()));
        assert_eq!(seen.load(Ordering::SeqCst), 10);

        drop(second);
        cache.notify("k", &1_usize, None);
        assert_eq!(seen.load(Ordering::SeqCst), 11);

        drop(first);
        assert_eq!(cache.listener_count("k"), 0);
    }
}
