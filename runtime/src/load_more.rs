//! Incremental "load more" lists.
//!
//! [`LoadMore`] drives one engine whose service receives the data loaded so far (`None`
//! for the first page). Each page's items are appended to the accumulated list; a refresh
//! starts over from the first page.

use crate::engine::Engine;
use crate::options::{service_fn, RequestOptions};
use crate::plugins::factory;
use crate::timer::detach_run;
use composable_request_core::{
    ConfigError, Data, Plugin, RequestError, RunFuture, StateCell,
};
use futures::future::{self, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Data made of a list of items plus page metadata
pub trait LoadMoreData: Data {
    /// Element type of the list
    type Item: Clone + Send + Sync + 'static;

    /// The items loaded so far
    fn items(&self) -> &[Self::Item];

    /// Replace the items
    fn set_items(&mut self, items: Vec<Self::Item>);
}

/// Decides from the accumulated data whether the list is exhausted
pub type NoMore<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

#[derive(Clone, Copy)]
enum Load {
    More,
    Refresh,
}

/// The two progress flags, owned by the latest load
struct Flags {
    loading_more: StateCell<bool>,
    refreshing: StateCell<bool>,
    epoch: AtomicU64,
}

impl Flags {
    /// Raise the flag for `load` and lower the other, which a new run supersedes
    fn begin(&self, load: Load) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.loading_more.set(matches!(load, Load::More));
        self.refreshing.set(matches!(load, Load::Refresh));
        epoch
    }

    /// Lower both flags if no later load started since `epoch`
    fn finish(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.settle();
        }
    }

    fn settle(&self) {
        self.loading_more.set(false);
        self.refreshing.set(false);
    }
}

/// Resets the flags when a run settles or is cancelled
struct FlagsPlugin(Arc<Flags>);

impl<R> Plugin<Option<R>, R> for FlagsPlugin
where
    R: Data,
{
    fn on_success(&self, _data: &R, _params: &Option<R>) {
        self.0.settle();
    }

    fn on_error(&self, _error: &RequestError, _params: &Option<R>) {
        self.0.settle();
    }

    fn on_cancel(&self) {
        self.0.settle();
    }
}

/// Accumulating list loader
pub struct LoadMore<R> {
    engine: Engine<Option<R>, R>,
    flags: Arc<Flags>,
    is_no_more: NoMore<R>,
}

impl<R> Clone for LoadMore<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            flags: Arc::clone(&self.flags),
            is_no_more: Arc::clone(&self.is_no_more),
        }
    }
}

impl<R> LoadMore<R>
where
    R: LoadMoreData,
{
    /// Bind `service`, which loads the page after the given data.
    ///
    /// `is_no_more` is consulted on the accumulated data before every `load_more`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the options combine unsupported features.
    pub fn new<F, Fut, E, N>(
        service: F,
        options: RequestOptions<Option<R>, R>,
        is_no_more: N,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(Option<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<RequestError>,
        N: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let page = service_fn(service);
        let accumulate = move |previous: Option<R>| {
            let call = page(previous.clone());
            async move {
                let mut next = call.await?;
                if let Some(previous) = previous {
                    let mut items = previous.items().to_vec();
                    items.extend_from_slice(next.items());
                    next.set_items(items);
                }
                Ok::<_, RequestError>(next)
            }
        };

        let flags = Arc::new(Flags {
            loading_more: StateCell::new(false),
            refreshing: StateCell::new(false),
            epoch: AtomicU64::new(0),
        });
        let plugin_flags = Arc::clone(&flags);
        let options = options.with_plugin(factory(move |_context| {
            let plugin: Arc<dyn Plugin<Option<R>, R>> =
                Arc::new(FlagsPlugin(Arc::clone(&plugin_flags)));
            Some(plugin)
        }));

        Ok(Self {
            engine: Engine::new(accumulate, options)?,
            flags,
            is_no_more: Arc::new(is_no_more),
        })
    }

    /// The underlying engine
    #[must_use]
    pub const fn engine(&self) -> &Engine<Option<R>, R> {
        &self.engine
    }

    /// Accumulated data
    #[must_use]
    pub fn data(&self) -> Option<R> {
        self.engine.data()
    }

    /// Whether the list is exhausted
    #[must_use]
    pub fn no_more(&self) -> bool {
        self.engine
            .data()
            .is_some_and(|data| (self.is_no_more)(&data))
    }

    /// Whether a next page is loading
    #[must_use]
    pub fn loading_more(&self) -> bool {
        self.flags.loading_more.get()
    }

    /// Whether the list is reloading from scratch
    #[must_use]
    pub fn refreshing(&self) -> bool {
        self.flags.refreshing.get()
    }

    /// Whether any load is in flight
    #[must_use]
    pub fn loading(&self) -> bool {
        self.engine.loading()
    }

    /// Load and append the next page; resolves to `Ok(None)` when there is no more
    ///
    /// # Errors
    ///
    /// The returned future fails with the service's [`RequestError`].
    pub fn load_more_async(&self) -> RunFuture<R> {
        if self.no_more() {
            return future::ready(Ok(None)).boxed();
        }
        self.start(Load::More, self.engine.data())
    }

    /// Load and append the next page in the background; no-op when there is no more
    pub fn load_more(&self) {
        if self.no_more() {
            return;
        }
        self.engine.spawn_logged(self.start(Load::More, self.engine.data()));
    }

    /// Reload from the first page
    ///
    /// # Errors
    ///
    /// The returned future fails with the service's [`RequestError`].
    pub fn refresh_async(&self) -> RunFuture<R> {
        self.start(Load::Refresh, None)
    }

    /// Reload from the first page in the background
    pub fn refresh(&self) {
        self.engine.spawn_logged(self.start(Load::Refresh, None));
    }

    /// Run with the flag for `load` raised until this run ends, however it ends.
    ///
    /// Halted, coalesced and superseded runs never reach the plugin hooks, so the flags
    /// are lowered once the run's future resolves.
    fn start(&self, load: Load, params: Option<R>) -> RunFuture<R> {
        let epoch = self.flags.begin(load);
        let run = self.engine.run_async(params);
        let flags = Arc::clone(&self.flags);
        detach_run(
            async move {
                let result = run.await;
                flags.finish(epoch);
                result
            }
            .boxed(),
        )
    }

    /// Abandon the load in flight
    pub fn cancel(&self) {
        self.engine.cancel();
    }

    /// Overwrite the accumulated data
    pub fn mutate(&self, data: R) {
        self.engine.mutate(data);
    }
}
