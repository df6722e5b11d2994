//! Keyed concurrent queries.
//!
//! A [`MultiQuery`] keeps one independent [`Engine`] per key derived from the run
//! parameters, created on first use. The engine of the most recent run is the *active*
//! one and backs the top-level accessors; every engine stays observable through
//! [`MultiQuery::query`] and [`MultiQuery::queries`], which is what per-row loading
//! indicators read.

use crate::engine::Engine;
use crate::options::{service_fn, RequestOptions, ServiceFn};
use composable_request_core::{
    ConfigError, ConfigLayer, Data, Params, QueryState, RequestError, RunFuture, StateCell,
};
use futures::future::{self, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Derives the engine key from run parameters
pub type QueryKey<P> = Arc<dyn Fn(&P) -> String + Send + Sync>;

struct MultiInner<P, R> {
    service: ServiceFn<P, R>,
    options: RequestOptions<P, R>,
    query_key: QueryKey<P>,
    engines: Mutex<HashMap<String, Engine<P, R>>>,
    active: StateCell<Option<String>>,
}

/// One engine per key
pub struct MultiQuery<P, R> {
    inner: Arc<MultiInner<P, R>>,
}

impl<P, R> Clone for MultiQuery<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, R> MultiQuery<P, R>
where
    P: Params,
    R: Data,
{
    /// Build a coordinator over `service`.
    ///
    /// Per-key engines are always manual; unless `options` say otherwise, the default
    /// parameters are run once here.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the options combine unsupported features.
    pub fn new<F, Fut, E, K>(
        service: F,
        query_key: K,
        options: RequestOptions<P, R>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<RequestError>,
        K: Fn(&P) -> String + Send + Sync + 'static,
    {
        let resolved = ConfigLayer::layered(&options.config, options.scope.as_ref());
        resolved.validate()?;
        options.validate()?;

        let manual = resolved.manual;
        let mut engine_options = options;
        engine_options.config = engine_options.config.clone().with_manual(true);
        let multi = Self {
            inner: Arc::new(MultiInner {
                service: service_fn(service),
                options: engine_options,
                query_key: Arc::new(query_key),
                engines: Mutex::new(HashMap::new()),
                active: StateCell::new(None),
            }),
        };
        if !manual {
            multi.run(multi.inner.options.default_params.clone());
        }
        Ok(multi)
    }

    fn engine_for(&self, key: &str) -> Option<Engine<P, R>> {
        let mut engines = self
            .inner
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = engines.get(key) {
            return Some(engine.clone());
        }
        match Engine::from_service(Arc::clone(&self.inner.service), self.inner.options.clone()) {
            Ok(engine) => {
                tracing::debug!(key, "Created keyed engine");
                engines.insert(key.to_string(), engine.clone());
                Some(engine)
            },
            Err(error) => {
                tracing::error!(key, error = %error, "Failed to create keyed engine");
                None
            },
        }
    }

    /// Run on the engine for `params`' key and make it active
    ///
    /// # Errors
    ///
    /// The returned future fails with the service's [`RequestError`].
    pub fn run_async(&self, params: P) -> RunFuture<R> {
        let key = (self.inner.query_key)(&params);
        let Some(engine) = self.engine_for(&key) else {
            return future::ready(Ok(None)).boxed();
        };
        self.inner.active.set(Some(key));
        engine.run_async(params)
    }

    /// Run in the background on the engine for `params`' key and make it active
    pub fn run(&self, params: P) {
        let key = (self.inner.query_key)(&params);
        if let Some(engine) = self.engine_for(&key) {
            self.inner.active.set(Some(key));
            engine.run(params);
        }
    }

    /// Refresh the active engine
    pub fn refresh(&self) {
        if let Some(engine) = self.active() {
            engine.refresh();
        }
    }

    /// Cancel the active engine
    pub fn cancel(&self) {
        if let Some(engine) = self.active() {
            engine.cancel();
        }
    }

    /// Overwrite the active engine's data
    pub fn mutate(&self, data: R) {
        if let Some(engine) = self.active() {
            engine.mutate(data);
        }
    }

    /// Key of the most recent run
    #[must_use]
    pub fn active_key(&self) -> Option<String> {
        self.inner.active.get()
    }

    /// Engine of the most recent run
    #[must_use]
    pub fn active(&self) -> Option<Engine<P, R>> {
        let key = self.active_key()?;
        self.query(&key)
    }

    /// Engine for `key`, if one was created
    #[must_use]
    pub fn query(&self, key: &str) -> Option<Engine<P, R>> {
        self.inner
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Snapshot of every engine by key
    #[must_use]
    pub fn queries(&self) -> HashMap<String, QueryState<P, R>> {
        self.inner
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, engine)| (key.clone(), engine.snapshot()))
            .collect()
    }

    /// Active engine's loading flag
    #[must_use]
    pub fn loading(&self) -> bool {
        self.active().is_some_and(|engine| engine.loading())
    }

    /// Active engine's data
    #[must_use]
    pub fn data(&self) -> Option<R> {
        self.active().and_then(|engine| engine.data())
    }

    /// Active engine's error
    #[must_use]
    pub fn error(&self) -> Option<RequestError> {
        self.active().and_then(|engine| engine.error())
    }

    /// Active engine's params
    #[must_use]
    pub fn params(&self) -> Option<P> {
        self.active().and_then(|engine| engine.params())
    }

    /// Dispose every engine
    pub fn dispose(&self) {
        let engines: Vec<Engine<P, R>> = self
            .inner
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, engine)| engine)
            .collect();
        for engine in engines {
            engine.dispose();
        }
        self.inner.active.set(None);
    }
}
