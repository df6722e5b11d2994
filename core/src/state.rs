//! Observable state for a single request binding.
//!
//! [`StateCell`] is the mutable observable cell every engine field lives in. It is a thin
//! wrapper around [`tokio::sync::watch`]: a `set` is visible to the very next `get` in the
//! same synchronous step, and every receiver obtained through [`StateCell::subscribe`] is
//! woken on change.
//!
//! [`QueryState`] is a plain snapshot of all cells, handy for assertions and for the
//! multi-query coordinator's per-key views.

use crate::error::RequestError;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

/// Lifecycle status of an engine.
///
/// `Pending` spans the interval between a run starting and its terminal `on_after`
/// emission for the same generation; every other moment is `Settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// An invocation is in flight
    Pending,

    /// No invocation is in flight
    #[default]
    Settled,
}

impl Status {
    /// Check if an invocation is in flight
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Settled => write!(f, "settled"),
        }
    }
}

/// Mutable observable cell with synchronous read-after-write visibility.
///
/// # Example
///
/// ```
/// use composable_request_core::StateCell;
///
/// let cell = StateCell::new(1);
/// let rx = cell.subscribe();
/// cell.set(2);
/// assert_eq!(cell.get(), 2);
/// assert!(rx.has_changed().unwrap_or(false));
/// ```
pub struct StateCell<T> {
    tx: watch::Sender<T>,
}

impl<T> StateCell<T> {
    /// Create a cell holding `value`
    #[must_use]
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    /// Read the current value
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.tx.borrow().clone()
    }

    /// Read the current value through a closure without cloning it
    pub fn with<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&T) -> O,
    {
        f(&self.tx.borrow())
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Modify the value in place and notify subscribers
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.tx.send_modify(f);
    }

    /// Subscribe to changes
    ///
    /// The returned receiver has already seen the current value; only later
    /// `set`/`update` calls wake it.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Stream of change notifications
    ///
    /// Yields `()` once per observed change and ends when the cell is dropped.
    #[must_use]
    pub fn changes(&self) -> BoxStream<'static, ()>
    where
        T: Send + Sync + 'static,
    {
        watch_changes(self.tx.subscribe())
    }
}

impl<T: Default> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateCell").field(&*self.tx.borrow()).finish()
    }
}

/// Turn a watch receiver into a stream that yields once per change
pub fn watch_changes<T>(rx: watch::Receiver<T>) -> BoxStream<'static, ()>
where
    T: Send + Sync + 'static,
{
    stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok().map(|()| ((), rx))
    })
    .boxed()
}

/// Point-in-time view of an engine's observable state
#[derive(Debug, Clone)]
pub struct QueryState<P, R> {
    /// Lifecycle status
    pub status: Status,

    /// Whether a loading indicator should be shown
    pub loading: bool,

    /// Last successful value, or the initial value
    pub data: Option<R>,

    /// Last error, cleared when a new invocation starts and on success
    pub error: Option<RequestError>,

    /// Parameters of the most recent invocation attempt
    pub params: Option<P>,
}

impl<P, R> Default for QueryState<P, R> {
    fn default() -> Self {
        Self {
            status: Status::Settled,
            loading: false,
            data: None,
            error: None,
            params: None,
        }
    }
}
