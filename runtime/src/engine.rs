//! The invocation engine.
//!
//! An [`Engine`] binds one service function and drives every invocation of it through
//! the plugin pipeline:
//!
//! ```text
//!  run_async(params)
//!     │
//!     ▼
//!  on_run chain ─────────────► invoke
//!                               │ generation += 1, status = Pending
//!                               │ merge_before(on_before...)
//!                               │    ├─ Break(v)   → Settled, resolve v
//!                               │    ├─ Return(v)  → data = v, Settled, on_after
//!                               │    └─ Proceed(p) → loading, params, patch
//!                               │ on_query chain → service(params)
//!                               ▼
//!                       (await) result
//!                               │ generation changed? → discard, resolve None
//!                               ▼
//!                  apply, on_success / on_error, on_after
//! ```
//!
//! The generation token is the only staleness mechanism: a completion is applied only if
//! no run or cancel happened since it started. The service future itself is never
//! aborted.

use crate::environment::RequestEnvironment;
use crate::options::{service_fn, Callbacks, RequestOptions, ServiceFn};
use crate::plugins::{self, PluginContext, PluginList};
use crate::timer::{detach_run, spawn_detached};
use composable_request_core::{
    merge_before, BeforeOutcome, ConfigError, ConfigLayer, Data, Params, Plugin, Query,
    QueryState, RequestError, ResolvedConfig, RunFuture, Runner, StateCell, Status,
};
use futures::future::{self, FutureExt};
use metrics::counter;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::watch;

/// Prefix of the default error log
pub const LOG_PREFIX: &str = "composable-request:";

struct EngineInner<P, R> {
    service: ServiceFn<P, R>,
    config: ResolvedConfig,
    env: RequestEnvironment,
    default_params: P,
    callbacks: Callbacks<P, R>,
    plugins: OnceLock<PluginList<P, R>>,

    status: StateCell<Status>,
    loading: StateCell<bool>,
    data: StateCell<Option<R>>,
    error: StateCell<Option<RequestError>>,
    params: StateCell<Option<P>>,

    generation: AtomicU64,
    initial_auto_run: AtomicBool,
    disposed: AtomicBool,
}

impl<P, R> EngineInner<P, R>
where
    P: Params,
    R: Data,
{
    fn plugins(&self) -> &[Arc<dyn Plugin<P, R>>] {
        self.plugins
            .get()
            .map(|plugins| plugins.as_slice())
            .unwrap_or_default()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn run_async(self: &Arc<Self>, params: P) -> RunFuture<R> {
        let weak = Arc::downgrade(self);
        let base: Runner<P, R> = Arc::new(move |params| match weak.upgrade() {
            Some(inner) => Self::invoke(&inner, params),
            None => future::ready(Ok(None)).boxed(),
        });
        let runner = self.plugins().iter().rev().fold(base, |next, plugin| {
            let plugin = Arc::clone(plugin);
            Arc::new(move |params| plugin.on_run(params, Arc::clone(&next)))
        });
        runner(params)
    }

    fn run(self: &Arc<Self>, params: P) {
        self.spawn_logged(self.run_async(params));
    }

    /// Await `run` in the background, logging failures unless the user handles them
    fn spawn_logged(&self, run: RunFuture<R>) {
        let log_errors = self.callbacks.on_error.is_none();
        spawn_detached(async move {
            if let Err(error) = run.await {
                if log_errors {
                    tracing::error!(error = %error, "{LOG_PREFIX} {error}");
                }
            }
        });
    }

    fn refresh_params(&self) -> P {
        self.params.get().unwrap_or_else(|| self.default_params.clone())
    }

    /// The engine side of one invocation: everything up to starting the service call runs
    /// synchronously, the rest on a detached task whose outcome the returned future observes
    #[tracing::instrument(level = "debug", skip_all, fields(generation = tracing::field::Empty))]
    fn invoke(inner: &Arc<Self>, params: P) -> RunFuture<R> {
        if inner.disposed.load(Ordering::SeqCst) {
            tracing::debug!("Run on disposed engine ignored");
            return future::ready(Ok(None)).boxed();
        }
        inner.initial_auto_run.store(false, Ordering::SeqCst);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("generation", generation);
        counter!("request.invocations").increment(1);
        inner.status.set(Status::Pending);

        let outcome = merge_before(inner.plugins().iter().map(|plugin| plugin.on_before(&params)));
        let patch = match outcome {
            BeforeOutcome::Break(value) => {
                tracing::debug!("Run halted before the service call");
                inner.status.set(Status::Settled);
                return future::ready(Ok(value)).boxed();
            },
            BeforeOutcome::Return(value) => {
                tracing::debug!("Run answered by a plugin");
                inner.params.set(Some(params.clone()));
                inner.data.set(Some(value.clone()));
                inner.error.set(None);
                inner.loading.set(false);
                inner.status.set(Status::Settled);
                inner.emit_after(&params);
                return future::ready(Ok(Some(value))).boxed();
            },
            BeforeOutcome::Proceed(patch) => patch,
        };

        inner.loading.set(patch.loading.unwrap_or(true));
        inner.params.set(Some(params.clone()));
        if let Some(data) = patch.data {
            inner.data.set(Some(data));
        }
        inner.error.set(None);
        if let Some(on_before) = &inner.callbacks.on_before {
            on_before(&params);
        }

        let service = Arc::clone(&inner.service);
        let call_params = params.clone();
        let base: Query<R> = Box::new(move || service(call_params));
        let query = inner
            .plugins()
            .iter()
            .rev()
            .fold(base, |next, plugin| plugin.on_query(&params, next));
        let call = query();

        // The tail is spawned so the run settles even if the caller drops its future
        let inner = Arc::clone(inner);
        let settle = async move {
            let result = call.await;
            if !inner.is_current(generation) {
                tracing::debug!(generation, "Discarding stale result");
                counter!("request.stale_discarded").increment(1);
                return Ok(None);
            }
            match result {
                Ok(data) => {
                    inner.data.set(Some(data.clone()));
                    inner.error.set(None);
                    inner.loading.set(false);
                    inner.status.set(Status::Settled);
                    counter!("request.success").increment(1);
                    for plugin in inner.plugins() {
                        plugin.on_success(&data, &params);
                    }
                    if let Some(on_success) = &inner.callbacks.on_success {
                        on_success(&data, &params);
                    }
                    if inner.is_current(generation) {
                        inner.emit_after(&params);
                    }
                    Ok(Some(data))
                },
                Err(error) => {
                    inner.error.set(Some(error.clone()));
                    inner.loading.set(false);
                    inner.status.set(Status::Settled);
                    counter!("request.error").increment(1);
                    tracing::debug!(error = %error, "Service failed");
                    for plugin in inner.plugins() {
                        plugin.on_error(&error, &params);
                    }
                    if let Some(on_error) = &inner.callbacks.on_error {
                        on_error(&error, &params);
                    }
                    if inner.is_current(generation) {
                        inner.emit_after(&params);
                    }
                    Err(error)
                },
            }
        };
        detach_run(settle.boxed())
    }

    fn emit_after(&self, params: &P) {
        for plugin in self.plugins() {
            plugin.on_after(params);
        }
        if let Some(on_after) = &self.callbacks.on_after {
            on_after(params);
        }
    }

    fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.loading.set(false);
        self.status.set(Status::Settled);
        counter!("request.cancelled").increment(1);
        tracing::debug!("Engine cancelled");
        for plugin in self.plugins() {
            plugin.on_cancel();
        }
    }

    fn mutate(&self, data: R) {
        self.data.set(Some(data.clone()));
        for plugin in self.plugins() {
            plugin.on_mutate(&data);
        }
    }
}

/// Reactive request-state controller for one service binding.
///
/// Cheap to clone; clones drive the same state. Dropping the last clone releases the
/// plugins' timers and subscriptions.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new(
///     |id: u32| async move { fetch_user(id).await },
///     RequestOptions::new(1).with_config(ConfigLayer::new().with_error_retry_count(RetryCount::Limited(3))),
/// )?;
///
/// engine.run(2);
/// let user = engine.run_async(3).await?;
/// ```
pub struct Engine<P, R> {
    inner: Arc<EngineInner<P, R>>,
}

impl<P, R> Clone for Engine<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, R> Engine<P, R>
where
    P: Params,
    R: Data,
{
    /// Bind `service` with `options`.
    ///
    /// Unless `manual` is configured, the initial run with the default parameters starts
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the options combine unsupported features.
    pub fn new<F, Fut, E>(service: F, options: RequestOptions<P, R>) -> Result<Self, ConfigError>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<RequestError>,
    {
        Self::from_service(service_fn(service), options)
    }

    /// Bind an already boxed service.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the options combine unsupported features.
    pub fn from_service(
        service: ServiceFn<P, R>,
        options: RequestOptions<P, R>,
    ) -> Result<Self, ConfigError> {
        let config = ConfigLayer::layered(&options.config, options.scope.as_ref());
        config.validate()?;
        options.validate()?;

        let env = options
            .environment
            .clone()
            .unwrap_or_else(RequestEnvironment::global);

        let inner = Arc::new(EngineInner {
            service,
            config,
            env,
            default_params: options.default_params.clone(),
            callbacks: options.callbacks.clone(),
            plugins: OnceLock::new(),
            status: StateCell::new(Status::Settled),
            loading: StateCell::new(false),
            data: StateCell::new(options.initial_data.clone()),
            error: StateCell::new(None),
            params: StateCell::new(None),
            generation: AtomicU64::new(0),
            initial_auto_run: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        let context = PluginContext {
            handle: EngineHandle {
                inner: Arc::downgrade(&inner),
            },
            config: &inner.config,
            options: &options,
            env: &inner.env,
        };
        let list = plugins::build(&context);
        tracing::debug!(plugins = list.len(), "Engine constructed");
        // Only this constructor fills the slot, so it is always empty here
        let _ = inner.plugins.set(list);
        for plugin in inner.plugins() {
            plugin.on_init();
        }

        let engine = Self { inner };
        if !engine.inner.config.manual {
            engine.inner.initial_auto_run.store(true, Ordering::SeqCst);
            engine.run(engine.inner.default_params.clone());
        }
        Ok(engine)
    }

    /// Start a run and return its outcome.
    ///
    /// The synchronous part of the run (status, `on_before`, loading, params) has happened
    /// by the time this returns, unless a rate limiter deferred it. The future resolves to:
    ///
    /// - `Ok(Some(data))` on success or when a plugin answered the run
    /// - `Ok(None)` when the run was halted, superseded, cancelled or coalesced
    /// - `Err(error)` when the service failed
    ///
    /// # Errors
    ///
    /// The returned future fails with the service's [`RequestError`].
    pub fn run_async(&self, params: P) -> RunFuture<R> {
        self.inner.run_async(params)
    }

    /// Start a run in the background.
    ///
    /// Failures are logged with the `composable-request:` prefix unless an `on_error`
    /// callback is configured.
    pub fn run(&self, params: P) {
        self.inner.run(params);
    }

    /// Await `run` in the background with the same error logging as [`run`](Self::run)
    pub(crate) fn spawn_logged(&self, run: RunFuture<R>) {
        self.inner.spawn_logged(run);
    }

    /// Re-run with the last used parameters (or the defaults)
    pub fn refresh(&self) {
        self.inner.run(self.inner.refresh_params());
    }

    /// Re-run with the last used parameters (or the defaults) and return its outcome
    ///
    /// # Errors
    ///
    /// The returned future fails with the service's [`RequestError`].
    pub fn refresh_async(&self) -> RunFuture<R> {
        self.inner.run_async(self.inner.refresh_params())
    }

    /// Invalidate any in-flight run and stop loading.
    ///
    /// Data, error and params are kept. Every plugin is told so it can release timers.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Overwrite data without running the service
    pub fn mutate(&self, data: R) {
        self.inner.mutate(data);
    }

    /// Overwrite data with a function of the current data
    pub fn mutate_with<F>(&self, update: F)
    where
        F: FnOnce(Option<&R>) -> R,
    {
        let next = self.inner.data.with(|data| update(data.as_ref()));
        self.inner.mutate(next);
    }

    /// Cancel, then release every plugin's subscriptions.
    ///
    /// Later runs resolve to `Ok(None)` without calling the service.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel();
        for plugin in self.inner.plugins() {
            plugin.on_dispose();
        }
        tracing::debug!("Engine disposed");
    }

    /// Whether [`dispose`](Self::dispose) was called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Lifecycle status
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    /// Whether a loading indicator should be shown
    #[must_use]
    pub fn loading(&self) -> bool {
        self.inner.loading.get()
    }

    /// Last successful value or the initial data
    #[must_use]
    pub fn data(&self) -> Option<R> {
        self.inner.data.get()
    }

    /// Last error
    #[must_use]
    pub fn error(&self) -> Option<RequestError> {
        self.inner.error.get()
    }

    /// Parameters of the most recent run attempt
    #[must_use]
    pub fn params(&self) -> Option<P> {
        self.inner.params.get()
    }

    /// Parameters used when nothing has run yet
    #[must_use]
    pub fn default_params(&self) -> &P {
        &self.inner.default_params
    }

    /// The merged configuration this engine runs with
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    /// Snapshot of every state cell
    #[must_use]
    pub fn snapshot(&self) -> QueryState<P, R> {
        QueryState {
            status: self.status(),
            loading: self.loading(),
            data: self.data(),
            error: self.error(),
            params: self.params(),
        }
    }

    /// Watch the status
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Watch the loading flag
    #[must_use]
    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    /// Watch the data
    #[must_use]
    pub fn subscribe_data(&self) -> watch::Receiver<Option<R>> {
        self.inner.data.subscribe()
    }

    /// Watch the error
    #[must_use]
    pub fn subscribe_error(&self) -> watch::Receiver<Option<RequestError>> {
        self.inner.error.subscribe()
    }

    /// Watch the params
    #[must_use]
    pub fn subscribe_params(&self) -> watch::Receiver<Option<P>> {
        self.inner.params.subscribe()
    }

    /// Handle plugins use to reach this engine
    #[must_use]
    pub fn handle(&self) -> EngineHandle<P, R> {
        EngineHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<P, R> std::fmt::Debug for Engine<P, R>
where
    P: Params + std::fmt::Debug,
    R: Data + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.snapshot())
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Weak reference to an engine, handed to plugins
///
/// Every operation is a no-op once the engine is gone.
pub struct EngineHandle<P, R> {
    inner: Weak<EngineInner<P, R>>,
}

impl<P, R> Clone for EngineHandle<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<P, R> std::fmt::Debug for EngineHandle<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<P, R> EngineHandle<P, R>
where
    P: Params,
    R: Data,
{
    /// The engine, if it is still alive
    #[must_use]
    pub fn upgrade(&self) -> Option<Engine<P, R>> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }

    /// Start a run in the background
    pub fn run(&self, params: P) {
        if let Some(inner) = self.inner.upgrade() {
            inner.run(params);
        }
    }

    /// Start a run and return its outcome; `Ok(None)` if the engine is gone
    pub fn run_async(&self, params: P) -> RunFuture<R> {
        match self.inner.upgrade() {
            Some(inner) => inner.run_async(params),
            None => future::ready(Ok(None)).boxed(),
        }
    }

    /// Re-run with the last used parameters
    pub fn refresh(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.run(inner.refresh_params());
        }
    }

    /// Set the loading flag
    pub fn set_loading(&self, loading: bool) {
        if let Some(inner) = self.inner.upgrade() {
            inner.loading.set(loading);
        }
    }

    /// Set data directly, without emitting `on_mutate`
    pub fn set_data(&self, data: R) {
        if let Some(inner) = self.inner.upgrade() {
            inner.data.set(Some(data));
        }
    }

    /// Set params directly
    pub fn set_params(&self, params: P) {
        if let Some(inner) = self.inner.upgrade() {
            inner.params.set(Some(params));
        }
    }

    /// Lifecycle status; `Settled` if the engine is gone
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner
            .upgrade()
            .map_or(Status::Settled, |inner| inner.status.get())
    }

    /// Current data
    #[must_use]
    pub fn data(&self) -> Option<R> {
        self.inner.upgrade().and_then(|inner| inner.data.get())
    }

    /// Parameters of the most recent run, or the defaults
    #[must_use]
    pub fn params_or_default(&self) -> Option<P> {
        self.inner.upgrade().map(|inner| inner.refresh_params())
    }

    /// Whether the last run failed
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.error.with(Option::is_some))
    }

    /// Consume the "automatic initial run" marker.
    ///
    /// Returns `true` exactly once, for the run started by the constructor of a
    /// non-manual engine, if no other run started before it.
    pub fn take_initial_auto_run(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.initial_auto_run.swap(false, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::plugins::factory;
    use composable_request_core::StatePatch;
    use std::sync::Mutex;
    use std::time::Duration;

    fn manual() -> RequestOptions<u32, String> {
        RequestOptions::new(0)
            .with_config(ConfigLayer::new().with_manual(true))
            .with_environment(RequestEnvironment::isolated())
    }

    fn echo(
        delay_ms: u64,
    ) -> impl Fn(u32) -> futures::future::BoxFuture<'static, Result<String, RequestError>>
    + Send
    + Sync
    + 'static {
        move |n| {
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(format!("value-{n}"))
            }
            .boxed()
        }
    }

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
        outcome: BeforeOutcome<String>,
    }

    impl Plugin<u32, String> for Recorder {
        fn on_before(&self, _params: &u32) -> BeforeOutcome<String> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            self.outcome.clone()
        }

        fn on_query(&self, _params: &u32, next: Query<String>) -> Query<String> {
            let log = Arc::clone(&self.log);
            let name = self.name;
            Box::new(move || {
                log.lock().unwrap().push(format!("{name}:query"));
                next()
            })
        }

        fn on_success(&self, _data: &String, _params: &u32) {
            self.log.lock().unwrap().push(format!("{}:success", self.name));
        }

        fn on_after(&self, _params: &u32) {
            self.log.lock().unwrap().push(format!("{}:after", self.name));
        }
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
        outcome: BeforeOutcome<String>,
    ) -> crate::plugins::PluginFactory<u32, String> {
        let log = Arc::clone(log);
        factory(move |_ctx| {
            let plugin: Arc<dyn Plugin<u32, String>> = Arc::new(Recorder {
                log: Arc::clone(&log),
                name,
                outcome: outcome.clone(),
            });
            Some(plugin)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_async_applies_success() {
        let engine = Engine::new(echo(10), manual()).unwrap();
        assert_eq!(engine.status(), Status::Settled);

        let run = engine.run_async(3);
        assert_eq!(engine.status(), Status::Pending);
        assert!(engine.loading());
        assert_eq!(engine.params(), Some(3));

        assert_eq!(run.await.unwrap(), Some("value-3".to_string()));
        let state = engine.snapshot();
        assert_eq!(state.status, Status::Settled);
        assert!(!state.loading);
        assert_eq!(state.data.as_deref(), Some("value-3"));
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_data_and_propagates() {
        let engine = Engine::new(
            |n: u32| async move {
                if n == 0 {
                    Ok("ok".to_string())
                } else {
                    Err(anyhow::anyhow!("boom {n}"))
                }
            },
            manual().with_on_error(|_, _| {}),
        )
        .unwrap();

        engine.run_async(0).await.unwrap();
        let err = engine.run_async(1).await.unwrap_err();
        assert!(err.to_string().contains("boom 1"));
        assert_eq!(engine.data().as_deref(), Some("ok"));
        assert!(engine.error().is_some());
        assert!(!engine.loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_order_and_query_nesting() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let options = manual()
            .with_plugin(recorder(&log, "a", BeforeOutcome::proceed()))
            .with_plugin(recorder(&log, "b", BeforeOutcome::proceed()));
        let engine = Engine::new(echo(0), options).unwrap();
        engine.run_async(1).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:before", "b:before", "a:query", "b:query", "a:success", "b:success",
                "a:after", "b:after"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_skips_service_and_later_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let options = manual()
            .with_plugin(recorder(&log, "gate", BeforeOutcome::Break(None)))
            .with_plugin(recorder(&log, "late", BeforeOutcome::proceed()));
        let engine = Engine::new(echo(0), options).unwrap();

        assert_eq!(engine.run_async(1).await.unwrap(), None);
        assert_eq!(*log.lock().unwrap(), vec!["gate:before"]);
        assert_eq!(engine.status(), Status::Settled);
        assert_eq!(engine.data(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_settles_with_plugin_data_and_emits_after() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let options = manual().with_plugin(recorder(
            &log,
            "stub",
            BeforeOutcome::Return("stubbed".to_string()),
        ));
        let engine = Engine::new(echo(0), options).unwrap();

        assert_eq!(engine.run_async(1).await.unwrap().as_deref(), Some("stubbed"));
        assert_eq!(engine.data().as_deref(), Some("stubbed"));
        assert_eq!(*log.lock().unwrap(), vec!["stub:before", "stub:after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proceed_patch_applied_before_call() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let options = manual().with_plugin(recorder(
            &log,
            "patch",
            BeforeOutcome::Proceed(StatePatch {
                loading: Some(false),
                data: Some("placeholder".to_string()),
            }),
        ));
        let engine = Engine::new(echo(100), options).unwrap();

        let run = engine.run_async(1);
        assert!(!engine.loading());
        assert_eq!(engine.data().as_deref(), Some("placeholder"));
        run.await.unwrap();
        assert_eq!(engine.data().as_deref(), Some("value-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_run_resolving_late_is_discarded() {
        let engine = Engine::new(
            |n: u32| async move {
                tokio::time::sleep(Duration::from_millis(u64::from(n))).await;
                Ok::<_, RequestError>(n.to_string())
            },
            manual(),
        )
        .unwrap();

        let slow = engine.run_async(300);
        let fast = engine.run_async(100);
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(fast.unwrap().as_deref(), Some("100"));
        assert_eq!(slow.unwrap(), None);
        assert_eq!(engine.data().as_deref(), Some("100"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_future_still_settles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let options = manual().with_plugin(recorder(&log, "obs", BeforeOutcome::proceed()));
        let engine = Engine::new(echo(100), options).unwrap();

        drop(engine.run_async(1));
        assert!(engine.loading());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!engine.loading());
        assert_eq!(engine.status(), Status::Settled);
        assert_eq!(engine.data().as_deref(), Some("value-1"));
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("obs:after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resets_loading_and_drops_result() {
        let engine = Engine::new(echo(1000), manual()).unwrap();
        let run = engine.run_async(1);
        assert!(engine.loading());
        engine.cancel();
        assert!(!engine.loading());
        assert_eq!(run.await.unwrap(), None);
        assert_eq!(engine.data(), None);
        assert_eq!(engine.params(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_and_mutate_with() {
        let engine = Engine::new(echo(0), manual().with_initial_data("a".to_string())).unwrap();
        engine.mutate("b".to_string());
        assert_eq!(engine.data().as_deref(), Some("b"));
        engine.mutate_with(|prev| format!("{}c", prev.map_or("", String::as_str)));
        assert_eq!(engine.data().as_deref(), Some("bc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_automatic_initial_run_uses_default_params() {
        let engine = Engine::new(
            echo(10),
            RequestOptions::new(5).with_environment(RequestEnvironment::isolated()),
        )
        .unwrap();
        assert!(engine.loading());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.data().as_deref(), Some("value-5"));

        engine.refresh_async().await.unwrap();
        assert_eq!(engine.params(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_engine_ignores_runs() {
        let engine = Engine::new(echo(0), manual()).unwrap();
        engine.dispose();
        assert!(engine.is_disposed());
        assert_eq!(engine.run_async(1).await.unwrap(), None);
        assert_eq!(engine.params(), None);
    }

    #[test]
    fn test_debounce_with_throttle_rejected() {
        let options = manual().with_config(
            ConfigLayer::new()
                .with_manual(true)
                .with_debounce_interval(Duration::from_millis(10))
                .with_throttle_interval(Duration::from_millis(10)),
        );
        let err = Engine::new(echo(0), options).unwrap_err();
        assert_eq!(err, ConfigError::DebounceWithThrottle);
    }
}
