//! The plugin contract.
//!
//! A plugin is an interceptor that implements any subset of the lifecycle hooks below.
//! The engine emits the hooks around every invocation:
//!
//! ```text
//!   run_async(params)
//!     │
//!     ├─ on_run ........ middleware around the whole run path (debounce, throttle)
//!     │
//!     ├─ on_before ..... first Break/Return wins, Proceed patches merge left to right
//!     │
//!     ├─ on_query ...... middleware around the service call, first plugin outermost
//!     │
//!     ├─ on_success / on_error
//!     └─ on_after
//!
//!   cancel()   → on_cancel
//!   mutate()   → on_mutate
//!   dispose()  → on_dispose
//! ```
//!
//! Notification hooks fire in registration order.

use crate::error::RequestError;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Bounds every parameter type satisfies
pub trait Params: Clone + Send + Sync + 'static {}
impl<P> Params for P where P: Clone + Send + Sync + 'static {}

/// Bounds every data type satisfies
pub trait Data: Clone + Send + Sync + 'static {}
impl<R> Data for R where R: Clone + Send + Sync + 'static {}

/// Future of one service call
pub type QueryFuture<R> = BoxFuture<'static, Result<R, RequestError>>;

/// The rest of the `on_query` chain; calling it starts the call
pub type Query<R> = Box<dyn FnOnce() -> QueryFuture<R> + Send>;

/// Future of one run
///
/// Resolves to `Ok(None)` when the run produced no value: it was halted before the
/// service call, superseded by a newer run or a cancel, or coalesced by a rate limiter.
pub type RunFuture<R> = BoxFuture<'static, Result<Option<R>, RequestError>>;

/// The rest of the `on_run` chain
pub type Runner<P, R> = Arc<dyn Fn(P) -> RunFuture<R> + Send + Sync>;

/// Partial state a plugin asks the engine to apply before the service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePatch<R> {
    /// Override for the loading flag (the engine sets `true` otherwise)
    pub loading: Option<bool>,

    /// Value to show while the call is in flight
    pub data: Option<R>,
}

impl<R> Default for StatePatch<R> {
    fn default() -> Self {
        Self {
            loading: None,
            data: None,
        }
    }
}

impl<R> StatePatch<R> {
    /// Patch that only overrides loading
    #[must_use]
    pub const fn loading(loading: bool) -> Self {
        Self {
            loading: Some(loading),
            data: None,
        }
    }

    /// Patch that only provides data
    #[must_use]
    pub const fn data(data: R) -> Self {
        Self {
            loading: None,
            data: Some(data),
        }
    }

    /// Merge a later patch over this one; fields set by `later` win
    #[must_use]
    pub fn merge(self, later: Self) -> Self {
        Self {
            loading: later.loading.or(self.loading),
            data: later.data.or(self.data),
        }
    }
}

/// What a plugin's `on_before` asks the engine to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeforeOutcome<R> {
    /// Continue to the service call, applying the patch first
    Proceed(StatePatch<R>),

    /// Halt: settle immediately, no service call and no further hooks.
    /// The run resolves with the carried value, if any.
    Break(Option<R>),

    /// Skip the service call but settle with this data and emit `on_after`
    Return(R),
}

impl<R> BeforeOutcome<R> {
    /// Continue without changes
    #[must_use]
    pub fn proceed() -> Self {
        Self::Proceed(StatePatch::default())
    }

    /// Check if this outcome lets the invocation continue
    #[must_use]
    pub const fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed(_))
    }
}

impl<R> Default for BeforeOutcome<R> {
    fn default() -> Self {
        Self::proceed()
    }
}

/// Combine `on_before` outcomes in registration order.
///
/// The first `Break` or `Return` wins and stops evaluation, so later plugins' `on_before`
/// is never called for that run. `Proceed` patches merge left to right, later fields
/// overriding earlier ones.
///
/// # Example
///
/// ```
/// use composable_request_core::plugin::{merge_before, BeforeOutcome, StatePatch};
///
/// let merged = merge_before([
///     BeforeOutcome::Proceed(StatePatch::loading(false)),
///     BeforeOutcome::Break(Some(1)),
///     BeforeOutcome::Return(2),
/// ]);
/// assert_eq!(merged, BeforeOutcome::Break(Some(1)));
/// ```
pub fn merge_before<R, I>(outcomes: I) -> BeforeOutcome<R>
where
    I: IntoIterator<Item = BeforeOutcome<R>>,
{
    let mut patch = StatePatch::default();
    for outcome in outcomes {
        match outcome {
            BeforeOutcome::Proceed(next) => patch = patch.merge(next),
            short_circuit => return short_circuit,
        }
    }
    BeforeOutcome::Proceed(patch)
}

/// A lifecycle interceptor.
///
/// Every hook has a no-op default. Plugins are built once per engine, receive a handle to
/// the engine at construction, and are fixed for the engine's lifetime.
#[allow(unused_variables)]
pub trait Plugin<P, R>: Send + Sync {
    /// Called once after the engine is fully constructed
    fn on_init(&self) {}

    /// Wrap the run path. Must call `next` at most once.
    fn on_run(&self, params: P, next: Runner<P, R>) -> RunFuture<R> {
        next(params)
    }

    /// Inspect a run before the service call
    fn on_before(&self, params: &P) -> BeforeOutcome<R> {
        BeforeOutcome::proceed()
    }

    /// Wrap the service call. The returned query must call `next` at most once,
    /// or substitute another future for it.
    fn on_query(&self, params: &P, next: Query<R>) -> Query<R> {
        next
    }

    /// The service call succeeded and its result was applied
    fn on_success(&self, data: &R, params: &P) {}

    /// The service call failed and the error was applied
    fn on_error(&self, error: &RequestError, params: &P) {}

    /// The run settled and no newer run or cancel happened since it started
    fn on_after(&self, params: &P) {}

    /// The engine was cancelled; release timers
    fn on_cancel(&self) {}

    /// Data was overwritten through `mutate`
    fn on_mutate(&self, data: &R) {}

    /// The engine was disposed; release subscriptions
    fn on_dispose(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_patches_merge_left_to_right() {
        let merged = merge_before([
            BeforeOutcome::Proceed(StatePatch::loading(false)),
            BeforeOutcome::Proceed(StatePatch::data(7)),
            BeforeOutcome::Proceed(StatePatch::loading(true)),
        ]);
        assert_eq!(
            merged,
            BeforeOutcome::Proceed(StatePatch {
                loading: Some(true),
                data: Some(7),
            })
        );
    }

    #[test]
    fn test_later_proceed_does_not_mask_break() {
        let merged = merge_before([
            BeforeOutcome::Break(None),
            BeforeOutcome::<i32>::proceed(),
        ]);
        assert_eq!(merged, BeforeOutcome::Break(None));
    }

    #[test]
    fn test_short_circuit_stops_evaluation() {
        let mut evaluated = 0;
        let outcomes = [
            BeforeOutcome::proceed(),
            BeforeOutcome::Return(3),
            BeforeOutcome::Break(None),
        ];
        let merged = merge_before(outcomes.into_iter().inspect(|_| evaluated += 1));
        assert_eq!(merged, BeforeOutcome::Return(3));
        assert_eq!(evaluated, 2);
    }

    fn outcome() -> impl Strategy<Value = BeforeOutcome<u8>> {
        prop_oneof![
            (any::<Option<bool>>(), any::<Option<u8>>())
                .prop_map(|(loading, data)| BeforeOutcome::Proceed(StatePatch { loading, data })),
            any::<Option<u8>>().prop_map(BeforeOutcome::Break),
            any::<u8>().prop_map(BeforeOutcome::Return),
        ]
    }

    proptest! {
        #[test]
        fn prop_first_short_circuit_wins(outcomes in proptest::collection::vec(outcome(), 0..8)) {
            let expected = outcomes.iter().find(|o| !o.is_proceed()).cloned();
            let merged = merge_before(outcomes);
            match expected {
                Some(first) => prop_assert_eq!(merged, first),
                None => prop_assert!(merged.is_proceed()),
            }
        }
    }
}
