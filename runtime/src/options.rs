//! Per-engine options.
//!
//! [`RequestOptions`] carries everything an engine needs besides its service: the
//! [`ConfigLayer`] of tunables, typed values that depend on the parameter and data types,
//! user callbacks and extra plugins.

use crate::cache::CacheEntry;
use crate::environment::RequestEnvironment;
use crate::plugins::PluginFactory;
use composable_request_core::{
    watch_changes, ConfigError, ConfigLayer, Data, Params, QueryFuture, RequestError,
};
use futures::future::FutureExt;
use futures::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// The bound service function
pub type ServiceFn<P, R> = Arc<dyn Fn(P) -> QueryFuture<R> + Send + Sync>;

/// Adapt a plain async function into a [`ServiceFn`]
///
/// Errors of any type convertible into [`RequestError`] (including [`anyhow::Error`]) are
/// normalized on the way out.
pub fn service_fn<P, R, F, Fut, E>(service: F) -> ServiceFn<P, R>
where
    P: Params,
    R: Data,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    E: Into<RequestError>,
{
    Arc::new(move |params| service(params).map(|result| result.map_err(Into::into)).boxed())
}

/// How the cache plugin derives a key from parameters
pub enum CacheKey<P> {
    /// The same key for every call
    Fixed(String),
    /// A key computed from the call's parameters
    Derived(Arc<dyn Fn(&P) -> String + Send + Sync>),
}

impl<P> CacheKey<P> {
    /// Key for `params`
    #[must_use]
    pub fn key(&self, params: &P) -> String {
        match self {
            Self::Fixed(key) => key.clone(),
            Self::Derived(derive) => derive(params),
        }
    }
}

impl<P> Clone for CacheKey<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(key) => Self::Fixed(key.clone()),
            Self::Derived(derive) => Self::Derived(Arc::clone(derive)),
        }
    }
}

impl<P> std::fmt::Debug for CacheKey<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Custom cache read
pub type CacheGetter<P, R> = Arc<dyn Fn(&str) -> Option<CacheEntry<R, P>> + Send + Sync>;

/// Custom cache write
pub type CacheSetter<P, R> = Arc<dyn Fn(&str, &CacheEntry<R, P>) + Send + Sync>;

/// Readiness gate for runs
#[derive(Clone, Default)]
pub enum Ready {
    /// Always ready
    #[default]
    Always,
    /// Ready whenever the predicate returns `true`; checked on every run.
    ///
    /// Nothing observes the predicate between runs, so a run it blocked (including the
    /// automatic initial run) is not replayed when it turns `true`. Use [`Ready::Signal`]
    /// to defer the initial run until the gate opens.
    Predicate(Arc<dyn Fn() -> bool + Send + Sync>),
    /// Ready while the channel holds `true`; becoming ready triggers the deferred run
    Signal(watch::Receiver<bool>),
}

impl Ready {
    /// Whether runs may proceed right now
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Predicate(predicate) => predicate(),
            Self::Signal(rx) => *rx.borrow(),
        }
    }

    /// Whether this gate can block at all
    #[must_use]
    pub const fn is_gated(&self) -> bool {
        !matches!(self, Self::Always)
    }
}

impl std::fmt::Debug for Ready {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Signal(rx) => f.debug_tuple("Signal").field(&*rx.borrow()).finish(),
        }
    }
}

/// Produces a fresh stream of change notifications for one refresh dependency
pub type DepSource = Arc<dyn Fn() -> BoxStream<'static, ()> + Send + Sync>;

/// Use a watch channel as a refresh dependency
#[must_use]
pub fn watch_dep<T>(rx: watch::Receiver<T>) -> DepSource
where
    T: Send + Sync + 'static,
{
    Arc::new(move || watch_changes(rx.clone()))
}

/// User callbacks, invoked after the plugins' hooks of the same name
pub struct Callbacks<P, R> {
    /// Before the service call
    pub on_before: Option<Arc<dyn Fn(&P) + Send + Sync>>,
    /// After a successful call was applied
    pub on_success: Option<Arc<dyn Fn(&R, &P) + Send + Sync>>,
    /// After a failed call was applied; suppresses the default error log
    pub on_error: Option<Arc<dyn Fn(&RequestError, &P) + Send + Sync>>,
    /// After a run settled
    pub on_after: Option<Arc<dyn Fn(&P) + Send + Sync>>,
}

impl<P, R> Default for Callbacks<P, R> {
    fn default() -> Self {
        Self {
            on_before: None,
            on_success: None,
            on_error: None,
            on_after: None,
        }
    }
}

impl<P, R> Clone for Callbacks<P, R> {
    fn clone(&self) -> Self {
        Self {
            on_before: self.on_before.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_after: self.on_after.clone(),
        }
    }
}

/// Options for one engine.
///
/// # Example
///
/// ```ignore
/// let options = RequestOptions::new(UserQuery { id: 1 })
///     .with_config(ConfigLayer::new().with_stale_time(Lifetime::Infinite))
///     .with_cache_key(CacheKey::Derived(Arc::new(|q: &UserQuery| format!("user:{}", q.id))))
///     .with_on_error(|error, _| eprintln!("{error}"));
/// ```
pub struct RequestOptions<P, R> {
    /// Parameters for the automatic initial run and for `refresh` before any run
    pub default_params: P,
    /// Data shown before the first success
    pub initial_data: Option<R>,
    /// Explicit tunables
    pub config: ConfigLayer,
    /// Tunables from an enclosing scope, between the explicit and global layers
    pub scope: Option<ConfigLayer>,
    /// Enables the cache plugin
    pub cache_key: Option<CacheKey<P>>,
    /// Custom cache read, replacing the shared value cache
    pub get_cache: Option<CacheGetter<P, R>>,
    /// Custom cache write, replacing the shared value cache
    pub set_cache: Option<CacheSetter<P, R>>,
    /// Readiness gate
    pub ready: Ready,
    /// Sources whose changes trigger a refresh
    pub refresh_deps: Vec<DepSource>,
    /// Replaces the refresh triggered by `refresh_deps`
    pub refresh_deps_action: Option<Arc<dyn Fn() + Send + Sync>>,
    /// User callbacks
    pub callbacks: Callbacks<P, R>,
    /// Extra plugins, registered after the built-in ones
    pub plugins: Vec<PluginFactory<P, R>>,
    /// Shared services; the process-wide environment when unset
    pub environment: Option<RequestEnvironment>,
}

impl<P, R> RequestOptions<P, R>
where
    P: Params,
    R: Data,
{
    /// Options with the given default parameters and nothing else set
    #[must_use]
    pub fn new(default_params: P) -> Self {
        Self {
            default_params,
            initial_data: None,
            config: ConfigLayer::default(),
            scope: None,
            cache_key: None,
            get_cache: None,
            set_cache: None,
            ready: Ready::Always,
            refresh_deps: Vec::new(),
            refresh_deps_action: None,
            callbacks: Callbacks::default(),
            plugins: Vec::new(),
            environment: None,
        }
    }

    /// Set the data shown before the first success
    #[must_use]
    pub fn with_initial_data(mut self, data: R) -> Self {
        self.initial_data = Some(data);
        self
    }

    /// Set the explicit tunables
    #[must_use]
    pub fn with_config(mut self, config: ConfigLayer) -> Self {
        self.config = config;
        self
    }

    /// Set the enclosing scope's tunables
    #[must_use]
    pub fn with_scope(mut self, scope: ConfigLayer) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Enable caching under `key`
    #[must_use]
    pub fn with_cache_key(mut self, key: CacheKey<P>) -> Self {
        self.cache_key = Some(key);
        self
    }

    /// Replace the shared value cache with a custom store
    #[must_use]
    pub fn with_cache_store(mut self, get: CacheGetter<P, R>, set: CacheSetter<P, R>) -> Self {
        self.get_cache = Some(get);
        self.set_cache = Some(set);
        self
    }

    /// Gate runs on readiness
    #[must_use]
    pub fn with_ready(mut self, ready: Ready) -> Self {
        self.ready = ready;
        self
    }

    /// Refresh when `dep` changes
    #[must_use]
    pub fn with_refresh_dep(mut self, dep: DepSource) -> Self {
        self.refresh_deps.push(dep);
        self
    }

    /// Run `action` instead of refreshing when a dependency changes
    #[must_use]
    pub fn with_refresh_deps_action<F>(mut self, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.refresh_deps_action = Some(Arc::new(action));
        self
    }

    /// Called before every service call
    #[must_use]
    pub fn with_on_before<F>(mut self, callback: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.callbacks.on_before = Some(Arc::new(callback));
        self
    }

    /// Called after every applied success
    #[must_use]
    pub fn with_on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&R, &P) + Send + Sync + 'static,
    {
        self.callbacks.on_success = Some(Arc::new(callback));
        self
    }

    /// Called after every applied failure
    #[must_use]
    pub fn with_on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RequestError, &P) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }

    /// Called after every settled run
    #[must_use]
    pub fn with_on_after<F>(mut self, callback: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.callbacks.on_after = Some(Arc::new(callback));
        self
    }

    /// Register an extra plugin
    #[must_use]
    pub fn with_plugin(mut self, factory: PluginFactory<P, R>) -> Self {
        self.plugins.push(factory);
        self
    }

    /// Bind to `environment` instead of the process-wide one
    #[must_use]
    pub fn with_environment(mut self, environment: RequestEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Check the typed options
    ///
    /// # Errors
    ///
    /// - [`ConfigError::IncompleteCacheStore`] if only one of the custom cache getter and
    ///   setter is supplied
    /// - [`ConfigError::EmptyCacheKey`] if a fixed cache key is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.get_cache.is_some() != self.set_cache.is_some() {
            return Err(ConfigError::IncompleteCacheStore);
        }
        if matches!(&self.cache_key, Some(CacheKey::Fixed(key)) if key.is_empty()) {
            return Err(ConfigError::EmptyCacheKey);
        }
        Ok(())
    }
}

impl<P, R> Default for RequestOptions<P, R>
where
    P: Params + Default,
    R: Data,
{
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P, R> Clone for RequestOptions<P, R>
where
    P: Clone,
    R: Clone,
{
    fn clone(&self) -> Self {
        Self {
            default_params: self.default_params.clone(),
            initial_data: self.initial_data.clone(),
            config: self.config.clone(),
            scope: self.scope.clone(),
            cache_key: self.cache_key.clone(),
            get_cache: self.get_cache.clone(),
            set_cache: self.set_cache.clone(),
            ready: self.ready.clone(),
            refresh_deps: self.refresh_deps.clone(),
            refresh_deps_action: self.refresh_deps_action.clone(),
            callbacks: self.callbacks.clone(),
            plugins: self.plugins.clone(),
            environment: self.environment.clone(),
        }
    }
}

impl<P, R> std::fmt::Debug for RequestOptions<P, R>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("default_params", &self.default_params)
            .field("config", &self.config)
            .field("scope", &self.scope)
            .field("cache_key", &self.cache_key)
            .field("ready", &self.ready)
            .field("refresh_deps", &self.refresh_deps.len())
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}
