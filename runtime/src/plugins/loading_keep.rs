//! Minimum loading time.
//!
//! Once the loading flag became visible, it stays on for at least the configured time so
//! it does not flicker. With a loading delay, calls settling within the delay never showed
//! the flag and are not held back.

use super::PluginContext;
use composable_request_core::{Data, Params, Plugin, Query};
use futures::future::FutureExt;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::Instant;

/// Holds a result back until the loading flag was on long enough
pub struct LoadingKeepPlugin<P, R> {
    keep: Duration,
    delay: Option<Duration>,
    _types: PhantomData<fn(P) -> R>,
}

impl<P, R> LoadingKeepPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a keep time is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        Some(Self {
            keep: context.config.loading_keep?,
            delay: context.config.loading_delay,
            _types: PhantomData,
        })
    }
}

impl<P, R> Plugin<P, R> for LoadingKeepPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_query(&self, _params: &P, next: Query<R>) -> Query<R> {
        let keep = self.keep;
        let delay = self.delay;
        Box::new(move || {
            let started = Instant::now();
            let call = next();
            async move {
                let result = call.await;
                let elapsed = started.elapsed();
                let shown = delay.is_none_or(|delay| elapsed > delay);
                if shown {
                    let until = started
                        .checked_add(delay.unwrap_or_default())
                        .and_then(|at| at.checked_add(keep));
                    match until {
                        Some(until) => tokio::time::sleep_until(until).await,
                        // Past the clock's range; `sleep` saturates
                        None => tokio::time::sleep(keep).await,
                    }
                }
                result
            }
            .boxed()
        })
    }
}
