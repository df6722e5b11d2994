//! Built-in plugins.
//!
//! Each plugin is built by a factory that receives a [`PluginContext`] and returns `None`
//! when its feature is not configured, so an engine only carries the plugins it uses.
//! Registration order, which is also hook order:
//!
//! | # | plugin | enabled by |
//! |---|--------|------------|
//! | 1 | [`ready::ReadyPlugin`] | `ready` gate |
//! | 2 | [`debounce::DebouncePlugin`] | `debounce_interval` |
//! | 3 | [`throttle::ThrottlePlugin`] | `throttle_interval` |
//! | 4 | [`loading_delay::LoadingDelayPlugin`] | `loading_delay` |
//! | 5 | [`loading_keep::LoadingKeepPlugin`] | `loading_keep` |
//! | 6 | [`retry::RetryPlugin`] | `error_retry_count` |
//! | 7 | [`polling::PollingPlugin`] | `polling_interval` |
//! | 8 | [`refresh_on_focus::RefreshOnFocusPlugin`] | `refresh_on_window_focus` |
//! | 9 | [`refresh_deps::RefreshDepsPlugin`] | `refresh_deps` |
//! | 10 | [`cache::CachePlugin`] | `cache_key` |
//!
//! User plugins from [`RequestOptions::plugins`] follow, in the order given.

pub mod cache;
pub mod debounce;
pub mod loading_delay;
pub mod loading_keep;
pub mod polling;
pub mod ready;
pub mod refresh_deps;
pub mod refresh_on_focus;
pub mod retry;
pub mod throttle;

use crate::engine::EngineHandle;
use crate::environment::RequestEnvironment;
use crate::options::RequestOptions;
use composable_request_core::{Data, Params, Plugin, ResolvedConfig};
use smallvec::SmallVec;
use std::sync::Arc;

/// Everything a plugin factory may read while the engine is being built
pub struct PluginContext<'a, P, R> {
    /// Handle to the engine under construction; usable from `on_init` onwards
    pub handle: EngineHandle<P, R>,
    /// The engine's merged configuration
    pub config: &'a ResolvedConfig,
    /// The engine's typed options
    pub options: &'a RequestOptions<P, R>,
    /// Shared services
    pub env: &'a RequestEnvironment,
}

/// Builds a plugin for one engine, or `None` to skip it
pub type PluginFactory<P, R> =
    Arc<dyn Fn(&PluginContext<'_, P, R>) -> Option<Arc<dyn Plugin<P, R>>> + Send + Sync>;

/// The plugins of one engine, in registration order
pub type PluginList<P, R> = SmallVec<[Arc<dyn Plugin<P, R>>; 8]>;

/// Box a closure as a [`PluginFactory`]
pub fn factory<P, R, F>(build: F) -> PluginFactory<P, R>
where
    F: Fn(&PluginContext<'_, P, R>) -> Option<Arc<dyn Plugin<P, R>>> + Send + Sync + 'static,
{
    Arc::new(build)
}

fn erase<P, R, T>(plugin: Option<T>) -> Option<Arc<dyn Plugin<P, R>>>
where
    T: Plugin<P, R> + 'static,
{
    plugin.map(|plugin| Arc::new(plugin) as Arc<dyn Plugin<P, R>>)
}

/// Build the built-in plugins followed by the user's
pub(crate) fn build<P, R>(context: &PluginContext<'_, P, R>) -> PluginList<P, R>
where
    P: Params,
    R: Data,
{
    let builtin = [
        erase(ready::ReadyPlugin::build(context)),
        erase(debounce::DebouncePlugin::build(context)),
        erase(throttle::ThrottlePlugin::build(context)),
        erase(loading_delay::LoadingDelayPlugin::build(context)),
        erase(loading_keep::LoadingKeepPlugin::build(context)),
        erase(retry::RetryPlugin::build(context)),
        erase(polling::PollingPlugin::build(context)),
        erase(refresh_on_focus::RefreshOnFocusPlugin::build(context)),
        erase(refresh_deps::RefreshDepsPlugin::build(context)),
        erase(cache::CachePlugin::build(context)),
    ];
    builtin
        .into_iter()
        .flatten()
        .chain(
            context
                .options
                .plugins
                .iter()
                .filter_map(|factory| factory(context)),
        )
        .collect()
}
