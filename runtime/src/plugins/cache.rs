//! Cache with stale-while-revalidate and request deduplication.
//!
//! - Fresh entries (younger than `stale_time`) answer a run without calling the service
//! - Stale entries are shown at once while the call revalidates them
//! - Concurrent calls for the same key share one in-flight request
//! - Successes and mutations are written through and broadcast, so engines sharing a key
//!   stay in sync without sharing an instance

use super::PluginContext;
use crate::cache::{CacheEntry, CacheSubscription, PromiseCache, ValueCache};
use crate::engine::EngineHandle;
use crate::options::{CacheGetter, CacheKey, CacheSetter};
use composable_request_core::{
    BeforeOutcome, Clock, Data, Lifetime, Params, Plugin, Query, StatePatch,
};
use futures::future::FutureExt;
use metrics::counter;
use std::sync::{Arc, Mutex, PoisonError};

enum Store<P, R> {
    Shared(ValueCache),
    Custom {
        get: CacheGetter<P, R>,
        set: CacheSetter<P, R>,
    },
}

/// Caches results by key
pub struct CachePlugin<P, R> {
    handle: EngineHandle<P, R>,
    key: CacheKey<P>,
    cache_time: Lifetime,
    stale_time: Lifetime,
    store: Store<P, R>,
    values: ValueCache,
    in_flight: PromiseCache,
    clock: Arc<dyn Clock>,
    current_query: Arc<Mutex<Option<u64>>>,
    subscription: Mutex<Option<CacheSubscription>>,
}

impl<P, R> CachePlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a cache key is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        let key = context.options.cache_key.clone()?;
        let store = match (&context.options.get_cache, &context.options.set_cache) {
            (Some(get), Some(set)) => Store::Custom {
                get: Arc::clone(get),
                set: Arc::clone(set),
            },
            _ => Store::Shared(context.env.values.clone()),
        };
        Some(Self {
            handle: context.handle.clone(),
            key,
            cache_time: context.config.cache_time,
            stale_time: context.config.stale_time,
            store,
            values: context.env.values.clone(),
            in_flight: context.env.in_flight.clone(),
            clock: Arc::clone(&context.env.clock),
            current_query: Arc::new(Mutex::new(None)),
            subscription: Mutex::new(None),
        })
    }

    fn read(&self, key: &str) -> Option<CacheEntry<R, P>> {
        match &self.store {
            Store::Shared(values) => values.get::<CacheEntry<R, P>>(key),
            Store::Custom { get, .. } => get(key),
        }
    }

    fn write(&self, key: &str, entry: &CacheEntry<R, P>) {
        match &self.store {
            Store::Shared(values) => values.set(key, entry.clone(), self.cache_time),
            Store::Custom { set, .. } => set(key, entry),
        }
    }

    fn own_listener(&self) -> Option<u64> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(CacheSubscription::id)
    }

    /// Listen on `key` for entries written by other engines
    fn follow(&self, key: &str) {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.as_ref().is_some_and(|current| current.key() == key) {
            return;
        }
        let handle = self.handle.clone();
        *subscription = Some(self.values.subscribe(key, move |entry: &CacheEntry<R, P>| {
            handle.set_data(entry.data.clone());
        }));
    }

    fn publish(&self, key: &str, entry: &CacheEntry<R, P>) {
        self.write(key, entry);
        self.follow(key);
        self.values.notify(key, entry, self.own_listener());
    }
}

impl<P, R> Plugin<P, R> for CachePlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_init(&self) {
        let Some(params) = self.handle.params_or_default() else {
            return;
        };
        let key = self.key.key(&params);
        if let Some(entry) = self.read(&key) {
            tracing::debug!(key, "Seeding state from cache");
            self.handle.set_data(entry.data);
            self.handle.set_params(entry.params);
        }
        self.follow(&key);
    }

    fn on_before(&self, params: &P) -> BeforeOutcome<R> {
        let key = self.key.key(params);
        self.follow(&key);
        let Some(entry) = self.read(&key) else {
            return BeforeOutcome::proceed();
        };
        if self.stale_time.covers(entry.age(self.clock.now())) {
            tracing::debug!(key, "Fresh cache hit");
            counter!("request.cache.hit").increment(1);
            self.handle.set_data(entry.data.clone());
            self.handle.set_loading(false);
            BeforeOutcome::Break(Some(entry.data))
        } else {
            tracing::debug!(key, "Stale cache entry, revalidating");
            counter!("request.cache.stale").increment(1);
            BeforeOutcome::Proceed(StatePatch::data(entry.data))
        }
    }

    fn on_query(&self, params: &P, next: Query<R>) -> Query<R> {
        let key = self.key.key(params);
        let in_flight = self.in_flight.clone();
        let current = Arc::clone(&self.current_query);
        Box::new(move || {
            let own = *current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((id, shared)) = in_flight.get::<R>(&key) {
                if own != Some(id) {
                    tracing::debug!(key, "Joining in-flight request");
                    counter!("request.cache.dedup").increment(1);
                    return shared.boxed();
                }
            }
            let (id, shared) = in_flight.insert(&key, next());
            *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
            shared.boxed()
        })
    }

    fn on_success(&self, data: &R, params: &P) {
        let key = self.key.key(params);
        let entry = CacheEntry {
            data: data.clone(),
            params: params.clone(),
            timestamp: self.clock.now(),
        };
        self.publish(&key, &entry);
    }

    fn on_mutate(&self, data: &R) {
        let Some(params) = self.handle.params_or_default() else {
            return;
        };
        let key = self.key.key(&params);
        let entry = CacheEntry {
            data: data.clone(),
            params,
            timestamp: self.clock.now(),
        };
        self.publish(&key, &entry);
    }

    fn on_dispose(&self) {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
