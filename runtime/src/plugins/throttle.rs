//! Throttled run path.

use super::debounce::limited_run;
use super::PluginContext;
use crate::engine::EngineHandle;
use crate::limiter::Debouncer;
use composable_request_core::{Data, Params, Plugin, RunFuture, Runner};

/// Runs at most once per interval, on the edges the throttle options enable.
///
/// The automatic initial run passes straight through.
pub struct ThrottlePlugin<P, R> {
    handle: EngineHandle<P, R>,
    throttle: Debouncer,
}

impl<P, R> ThrottlePlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a throttle interval is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        let interval = context.config.throttle_interval?;
        Some(Self {
            handle: context.handle.clone(),
            throttle: Debouncer::throttle(interval, context.config.throttle_options),
        })
    }
}

impl<P, R> Plugin<P, R> for ThrottlePlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_run(&self, params: P, next: Runner<P, R>) -> RunFuture<R> {
        if self.handle.take_initial_auto_run() {
            return next(params);
        }
        limited_run(&self.throttle, params, next)
    }

    fn on_cancel(&self) {
        self.throttle.cancel();
    }
}
