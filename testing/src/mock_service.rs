//! Scriptable service for engine tests.

#![allow(clippy::module_name_repetitions)] // MockService is the natural name

use composable_request_core::{Data, Params, RequestError};
use composable_request_runtime::ServiceFn;
use futures::future::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Type alias for the response script: parameters and zero-based call index in, outcome out
type Respond<P, R> = Arc<dyn Fn(&P, usize) -> Result<R, RequestError> + Send + Sync>;

/// A service whose responses are scripted and whose calls are recorded
///
/// Calls are recorded when the engine starts them, before any delay elapses.
///
/// # Example
///
/// ```ignore
/// let service = MockService::from_fn(|n: &u32, _call| Ok(n * 2))
///     .with_delay(Duration::from_millis(100));
///
/// let engine = Engine::from_service(service.service(), options)?;
/// engine.run(21);
/// assert_eq!(service.call_count(), 1);
/// ```
pub struct MockService<P, R> {
    respond: Respond<P, R>,
    delay: Duration,
    calls: Arc<Mutex<Vec<P>>>,
}

impl<P, R> Clone for MockService<P, R> {
    fn clone(&self) -> Self {
        Self {
            respond: Arc::clone(&self.respond),
            delay: self.delay,
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<P, R> MockService<P, R>
where
    P: Params,
    R: Data,
{
    /// Respond with `respond(params, call_index)`
    #[must_use]
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&P, usize) -> Result<R, RequestError> + Send + Sync + 'static,
    {
        Self {
            respond: Arc::new(respond),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeed with `value`
    #[must_use]
    pub fn resolving(value: R) -> Self {
        Self::from_fn(move |_, _| Ok(value.clone()))
    }

    /// Always fail with `message`
    #[must_use]
    pub fn failing(message: &'static str) -> Self {
        Self::from_fn(move |_, _| Err(RequestError::msg(message)))
    }

    /// Wait `delay` (in tokio time) before responding
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The service to hand to an engine
    #[must_use]
    pub fn service(&self) -> ServiceFn<P, R> {
        let mock = self.clone();
        Arc::new(move |params: P| {
            let index = {
                let mut calls = mock.calls.lock().unwrap_or_else(PoisonError::into_inner);
                calls.push(params.clone());
                calls.len() - 1
            };
            let respond = Arc::clone(&mock.respond);
            let delay = mock.delay;
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                respond(&params, index)
            }
            .boxed()
        })
    }

    /// Number of calls started so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Parameters of every call, in order
    #[must_use]
    pub fn calls(&self) -> Vec<P> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parameters of the latest call
    #[must_use]
    pub fn last_params(&self) -> Option<P> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}
