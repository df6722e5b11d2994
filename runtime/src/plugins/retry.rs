//! Retry on error.
//!
//! After a failure the plugin schedules a refresh according to the [`RetryPolicy`]. The
//! counter resets on success, on cancel and on every run it did not trigger itself, so a
//! user-initiated run never stacks with a pending retry.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::retry::RetryPolicy;
use crate::timer::Timer;
use composable_request_core::{
    BeforeOutcome, Data, Params, Plugin, RandomSource, RequestError, RetryCount,
};
use metrics::counter;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Re-runs failed requests
pub struct RetryPlugin<P, R> {
    handle: EngineHandle<P, R>,
    policy: RetryPolicy,
    random: Arc<dyn RandomSource>,
    retried: AtomicU32,
    retrying: Arc<AtomicBool>,
    timer: Timer,
}

impl<P, R> RetryPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when retries are enabled
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        let mut policy = RetryPolicy::builder().count(context.config.error_retry_count);
        if let Some(interval) = context.config.error_retry_interval {
            policy = policy.interval(interval);
        }
        let policy = policy.build();
        policy.is_enabled().then(|| Self {
            handle: context.handle.clone(),
            policy,
            random: Arc::clone(&context.env.random),
            retried: AtomicU32::new(0),
            retrying: Arc::new(AtomicBool::new(false)),
            timer: Timer::new(),
        })
    }

    /// Retries scheduled since the last reset
    #[must_use]
    pub fn retried(&self) -> u32 {
        self.retried.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.retried.store(0, Ordering::SeqCst);
    }
}

impl<P, R> Plugin<P, R> for RetryPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_before(&self, _params: &P) -> BeforeOutcome<R> {
        if !self.retrying.swap(false, Ordering::SeqCst) {
            self.reset();
        }
        self.timer.clear();
        BeforeOutcome::proceed()
    }

    fn on_success(&self, _data: &R, _params: &P) {
        self.reset();
    }

    fn on_error(&self, _error: &RequestError, _params: &P) {
        let retried = self.retried();
        if !self.policy.allows(retried) {
            tracing::debug!(retried, "Retry budget spent");
            return;
        }
        let delay = self.policy.next_delay(retried, self.random.as_ref());
        if self.policy.count != RetryCount::Infinite {
            self.retried.fetch_add(1, Ordering::SeqCst);
        }
        tracing::debug!(
            attempt = retried + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling retry"
        );
        counter!("request.retry.scheduled").increment(1);

        let handle = self.handle.clone();
        let retrying = Arc::clone(&self.retrying);
        self.timer.schedule(delay, async move {
            retrying.store(true, Ordering::SeqCst);
            handle.refresh();
        });
    }

    fn on_cancel(&self) {
        self.reset();
        self.retrying.store(false, Ordering::SeqCst);
        self.timer.clear();
    }
}
