//! Polling.
//!
//! After every settled run the plugin schedules a refresh. While the page is hidden or
//! offline (and polling is not allowed in that state) it pauses instead, and resumes with a
//! single refresh when the page becomes visible or the network reconnects. A failed run
//! with retries enabled is left to the retry plugin.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::listeners::{EventClass, Listener, ListenerRegistry, Subscription};
use crate::timer::Timer;
use composable_request_core::{BeforeOutcome, Data, Params, Plugin};
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Re-runs on an interval
pub struct PollingPlugin<P, R> {
    handle: EngineHandle<P, R>,
    interval: Duration,
    when_hidden: bool,
    when_offline: bool,
    retry_enabled: bool,
    listeners: ListenerRegistry,
    paused: Arc<AtomicBool>,
    timer: Timer,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<P, R> PollingPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a polling interval is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        Some(Self {
            handle: context.handle.clone(),
            interval: context.config.polling_interval?,
            when_hidden: context.config.polling_when_hidden,
            when_offline: context.config.polling_when_offline,
            retry_enabled: context.config.error_retry_count.is_enabled(),
            listeners: context.env.listeners.clone(),
            paused: Arc::new(AtomicBool::new(false)),
            timer: Timer::new(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    fn may_poll(&self) -> bool {
        (self.when_hidden || self.listeners.is_visible())
            && (self.when_offline || self.listeners.is_online())
    }

    /// Whether polling is paused waiting for visibility or connectivity
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl<P, R> Plugin<P, R> for PollingPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_init(&self) {
        let handle = self.handle.clone();
        let paused = Arc::clone(&self.paused);
        let resume: Listener = Arc::new(move || {
            if paused.swap(false, Ordering::SeqCst) {
                tracing::debug!("Resuming paused polling");
                handle.refresh();
            }
        });
        let subscriptions = vec![
            self.listeners
                .subscribe(EventClass::Visible, Arc::clone(&resume)),
            self.listeners.subscribe(EventClass::Reconnect, resume),
        ];
        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = subscriptions;
    }

    fn on_before(&self, _params: &P) -> BeforeOutcome<R> {
        self.timer.clear();
        BeforeOutcome::proceed()
    }

    fn on_after(&self, _params: &P) {
        if self.retry_enabled && self.handle.has_error() {
            return;
        }
        if !self.may_poll() {
            tracing::debug!("Polling paused");
            self.paused.store(true, Ordering::SeqCst);
            return;
        }
        counter!("request.polling.scheduled").increment(1);
        let handle = self.handle.clone();
        self.timer.schedule(self.interval, async move {
            handle.refresh();
        });
    }

    fn on_cancel(&self) {
        self.timer.clear();
        self.paused.store(false, Ordering::SeqCst);
    }

    fn on_dispose(&self) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
