//! Loading delay.
//!
//! Holds the loading flag off for the configured delay so a fast call never flashes a
//! loading state.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::timer::Timer;
use composable_request_core::{BeforeOutcome, Data, Params, Plugin, StatePatch};
use std::time::Duration;

/// Defers `loading = true`
pub struct LoadingDelayPlugin<P, R> {
    handle: EngineHandle<P, R>,
    delay: Duration,
    timer: Timer,
}

impl<P, R> LoadingDelayPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a loading delay is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        Some(Self {
            handle: context.handle.clone(),
            delay: context.config.loading_delay?,
            timer: Timer::new(),
        })
    }
}

impl<P, R> Plugin<P, R> for LoadingDelayPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_before(&self, _params: &P) -> BeforeOutcome<R> {
        let handle = self.handle.clone();
        self.timer.schedule(self.delay, async move {
            if handle.status().is_pending() {
                handle.set_loading(true);
            }
        });
        BeforeOutcome::Proceed(StatePatch::loading(false))
    }

    fn on_after(&self, _params: &P) {
        self.timer.clear();
    }

    fn on_cancel(&self) {
        self.timer.clear();
    }
}
