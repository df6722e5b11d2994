//! Refresh when the window regains focus or becomes visible, at most once per
//! `refocus_timespan`.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::limiter::LeadingLimiter;
use crate::listeners::{EventClass, Listener, ListenerRegistry, Subscription};
use composable_request_core::{Data, Params, Plugin};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Refreshes on focus and visibility
pub struct RefreshOnFocusPlugin<P, R> {
    handle: EngineHandle<P, R>,
    timespan: Duration,
    listeners: ListenerRegistry,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<P, R> RefreshOnFocusPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when refresh on focus is enabled
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        context.config.refresh_on_window_focus.then(|| Self {
            handle: context.handle.clone(),
            timespan: context.config.refocus_timespan,
            listeners: context.env.listeners.clone(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }
}

impl<P, R> Plugin<P, R> for RefreshOnFocusPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_init(&self) {
        let handle = self.handle.clone();
        let refresh: Listener = Arc::new(LeadingLimiter::wrap(self.timespan, move || {
            tracing::debug!("Refreshing on focus");
            handle.refresh();
        }));
        let subscriptions = vec![
            self.listeners
                .subscribe(EventClass::Focus, Arc::clone(&refresh)),
            self.listeners.subscribe(EventClass::Visible, refresh),
        ];
        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = subscriptions;
    }

    fn on_dispose(&self) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
