//! Refresh when a dependency changes.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::options::DepSource;
use crate::timer::TaskGuard;
use composable_request_core::{Data, Params, Plugin};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};

/// Watches the configured dependency streams
pub struct RefreshDepsPlugin<P, R> {
    handle: EngineHandle<P, R>,
    deps: Vec<DepSource>,
    action: Option<Arc<dyn Fn() + Send + Sync>>,
    manual: bool,
    watcher: Mutex<Option<TaskGuard>>,
}

impl<P, R> RefreshDepsPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when at least one dependency is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        let deps = context.options.refresh_deps.clone();
        (!deps.is_empty()).then(|| Self {
            handle: context.handle.clone(),
            deps,
            action: context.options.refresh_deps_action.clone(),
            manual: context.config.manual,
            watcher: Mutex::new(None),
        })
    }
}

impl<P, R> Plugin<P, R> for RefreshDepsPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_init(&self) {
        let mut changes = stream::select_all(self.deps.iter().map(|dep| dep()));
        let handle = self.handle.clone();
        let action = self.action.clone();
        let manual = self.manual;
        let watcher = TaskGuard::spawn(async move {
            while changes.next().await.is_some() {
                tracing::debug!("Refresh dependency changed");
                if let Some(action) = &action {
                    action();
                } else if !manual {
                    handle.refresh();
                }
            }
        });
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = watcher;
    }

    fn on_dispose(&self) {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
