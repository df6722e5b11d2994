//! # Composable Request Runtime
//!
//! Runtime implementation of the reactive request controller.
//!
//! This crate provides the [`Engine`] that binds one asynchronous service function and
//! tracks invoking it as observable state, plus the built-in plugins that layer caching,
//! retry, debounce, throttle, polling and friends onto every run.
//!
//! ## Core Components
//!
//! - **Engine**: runs the service, owns the state cells, drives the plugin hooks
//! - **Plugins**: one module per behaviour, ordered as listed in [`plugins`]
//! - **Environment**: the clock, randomness, caches and event listeners engines share
//! - **Coordinators**: [`MultiQuery`], [`Pagination`] and [`LoadMore`] built on engines
//!
//! ## Example
//!
//! ```ignore
//! use composable_request_runtime::{ConfigLayer, Engine, RequestOptions};
//!
//! let engine = Engine::new(
//!     |id: u32| async move { fetch_user(id).await },
//!     RequestOptions::new(1).with_config(ConfigLayer::new().with_manual(true)),
//! )?;
//!
//! // Run and await the outcome
//! let user = engine.run_async(7).await?;
//!
//! // Read state
//! let loading = engine.loading();
//! ```

/// Shared value cache and in-flight request cache
pub mod cache;

/// The request engine
pub mod engine;

/// Clock, randomness and shared registries
pub mod environment;

/// HTTP service descriptors
pub mod fetch;

/// Debounce, throttle and leading-edge rate limiters
pub mod limiter;

/// Focus, visibility and reconnect listeners
pub mod listeners;

/// Accumulating list loader
pub mod load_more;

/// Prometheus metrics for observability
pub mod metrics;

/// Keyed concurrent queries
pub mod multi;

/// Engine options
pub mod options;

/// Paginated queries
pub mod pagination;

/// Built-in plugins
pub mod plugins;

/// Retry logic with exponential backoff
pub mod retry;

/// Cancellable single-shot timers
pub mod timer;

pub use cache::{CacheEntry, CacheSubscription, PromiseCache, ValueCache};
pub use engine::{Engine, EngineHandle};
pub use environment::{RequestEnvironment, ThreadRandom, TokioClock};
pub use fetch::{RequestSpec, ServiceDescriptor};
pub use limiter::{Debouncer, LeadingLimiter};
pub use listeners::{EventClass, ListenerRegistry, Subscription};
pub use load_more::{LoadMore, LoadMoreData};
pub use multi::MultiQuery;
pub use options::{
    service_fn, watch_dep, CacheGetter, CacheKey, CacheSetter, Callbacks, DepSource, Ready,
    RequestOptions, ServiceFn,
};
pub use pagination::{PageParams, PagedData, Pagination};
pub use plugins::{factory, PluginContext, PluginFactory};
pub use retry::RetryPolicy;

// Re-export the core vocabulary so most users need one dependency
pub use composable_request_core::{
    config::{global_config, reset_global_config, set_global_config},
    BeforeOutcome, Clock, ConfigError, ConfigLayer, Data, DebounceOptions, Lifetime, Params,
    Plugin, QueryState, RandomSource, RequestError, ResolvedConfig, RetryCount, RunFuture,
    StatePatch, Status, ThrottleOptions,
};
