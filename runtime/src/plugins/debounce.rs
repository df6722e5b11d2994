//! Debounced run path.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::limiter::Debouncer;
use crate::timer::spawn_detached;
use composable_request_core::{Data, Params, Plugin, RunFuture, Runner};
use futures::future::FutureExt;
use tokio::sync::oneshot;

/// Defer a run through `limiter`; callers whose run was replaced resolve to `Ok(None)`
pub(crate) fn limited_run<P, R>(limiter: &Debouncer, params: P, next: Runner<P, R>) -> RunFuture<R>
where
    P: Params,
    R: Data,
{
    let (tx, rx) = oneshot::channel();
    limiter.call(move || {
        let run = next(params);
        spawn_detached(async move {
            let _ = tx.send(run.await);
        });
    });
    async move { rx.await.unwrap_or(Ok(None)) }.boxed()
}

/// Coalesces bursts of runs into one.
///
/// The automatic initial run passes straight through.
pub struct DebouncePlugin<P, R> {
    handle: EngineHandle<P, R>,
    debouncer: Debouncer,
}

impl<P, R> DebouncePlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a debounce interval is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        let interval = context.config.debounce_interval?;
        Some(Self {
            handle: context.handle.clone(),
            debouncer: Debouncer::new(interval, context.config.debounce_options),
        })
    }
}

impl<P, R> Plugin<P, R> for DebouncePlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_run(&self, params: P, next: Runner<P, R>) -> RunFuture<R> {
        if self.handle.take_initial_auto_run() {
            return next(params);
        }
        limited_run(&self.debouncer, params, next)
    }

    fn on_cancel(&self) {
        self.debouncer.cancel();
    }
}
