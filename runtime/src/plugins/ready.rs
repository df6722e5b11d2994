//! Ready gate.
//!
//! While the gate is closed every run is halted before the service call, remembering its
//! parameters. With a [`Ready::Signal`] gate, each transition to ready starts one run with
//! the last blocked parameters (or the defaults), unless the engine is manual. A
//! [`Ready::Predicate`] gate only answers when asked, so its blocked runs are dropped.

use super::PluginContext;
use crate::engine::EngineHandle;
use crate::options::Ready;
use crate::timer::TaskGuard;
use composable_request_core::{BeforeOutcome, Data, Params, Plugin};
use std::sync::{Arc, Mutex, PoisonError};

/// Halts runs until the gate opens
pub struct ReadyPlugin<P, R> {
    handle: EngineHandle<P, R>,
    ready: Ready,
    manual: bool,
    default_params: P,
    blocked: Arc<Mutex<Option<P>>>,
    watcher: Mutex<Option<TaskGuard>>,
}

impl<P, R> ReadyPlugin<P, R>
where
    P: Params,
    R: Data,
{
    /// Build when a gate is configured
    pub fn build(context: &PluginContext<'_, P, R>) -> Option<Self> {
        let ready = context.options.ready.clone();
        ready.is_gated().then(|| Self {
            handle: context.handle.clone(),
            ready,
            manual: context.config.manual,
            default_params: context.options.default_params.clone(),
            blocked: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        })
    }

    fn watch_signal(&self) -> Option<TaskGuard> {
        let Ready::Signal(rx) = &self.ready else {
            return None;
        };
        if self.manual {
            return None;
        }
        let mut rx = rx.clone();
        let handle = self.handle.clone();
        let blocked = Arc::clone(&self.blocked);
        let defaults = self.default_params.clone();
        TaskGuard::spawn(async move {
            let mut was_ready = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let now_ready = *rx.borrow_and_update();
                if now_ready && !was_ready {
                    let params = blocked
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take()
                        .unwrap_or_else(|| defaults.clone());
                    tracing::debug!("Ready gate opened, starting deferred run");
                    handle.run(params);
                }
                was_ready = now_ready;
            }
        })
    }
}

impl<P, R> Plugin<P, R> for ReadyPlugin<P, R>
where
    P: Params,
    R: Data,
{
    fn on_init(&self) {
        let watcher = self.watch_signal();
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = watcher;
    }

    fn on_before(&self, params: &P) -> BeforeOutcome<R> {
        if self.ready.is_ready() {
            return BeforeOutcome::proceed();
        }
        *self.blocked.lock().unwrap_or_else(PoisonError::into_inner) = Some(params.clone());
        self.handle.set_loading(false);
        tracing::debug!("Run blocked by ready gate");
        BeforeOutcome::Break(None)
    }

    fn on_dispose(&self) {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
